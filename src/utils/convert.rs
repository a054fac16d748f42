use crate::ConvertError;
use crate::Result;
use crate::Revision;

/// Converts a revision to an 8-byte array in big-endian byte order.
///
/// Revisions are never negative, so the big-endian encoding sorts the same
/// way as the numbers themselves.
///
/// # Examples
/// ```
/// use etx::utils::convert::revision_key;
///
/// let bytes = revision_key(0x1234_5678_9ABC_DEF0);
/// assert_eq!(bytes, [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]);
/// ```
pub const fn revision_key(revision: Revision) -> [u8; 8] {
    (revision as u64).to_be_bytes()
}

pub fn revision_from_key<K: AsRef<[u8]>>(bytes: K) -> Result<Revision> {
    let bytes = bytes.as_ref();
    let expected_len = 8;

    if bytes.len() != expected_len {
        return Err(ConvertError::InvalidLength(bytes.len()).into());
    }
    let mut array = [0u8; 8];
    array.copy_from_slice(bytes);
    let n = u64::from_be_bytes(array);
    Revision::try_from(n)
        .map_err(|_| ConvertError::ConversionFailure(format!("revision {n} overflows i64")).into())
}

pub const fn i64_key(num: i64) -> [u8; 8] {
    num.to_be_bytes()
}

pub fn i64_from_key<K: AsRef<[u8]>>(bytes: K) -> Result<i64> {
    let bytes = bytes.as_ref();
    if bytes.len() != 8 {
        return Err(ConvertError::InvalidLength(bytes.len()).into());
    }
    let mut array = [0u8; 8];
    array.copy_from_slice(bytes);
    Ok(i64::from_be_bytes(array))
}

/// Key of a history row in an ordered byte store:
/// `len(key) as u32 ++ key ++ revision_key(revision)`.
///
/// The length prefix keeps every revision of one key contiguous even when
/// one key is a prefix of another.
pub fn history_key(
    key: &[u8],
    revision: Revision,
) -> Vec<u8> {
    let mut buf = history_key_prefix(key);
    buf.extend_from_slice(&revision_key(revision));
    buf
}

pub fn history_key_prefix(key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + key.len() + 8);
    buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
    buf.extend_from_slice(key);
    buf
}

/// Key of the revision index: `revision_key(revision) ++ key`
pub fn revision_index_key(
    revision: Revision,
    key: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + key.len());
    buf.extend_from_slice(&revision_key(revision));
    buf.extend_from_slice(key);
    buf
}

/// Splits a revision index key back into `(revision, key)`
pub fn split_revision_index_key(bytes: &[u8]) -> Result<(Revision, Vec<u8>)> {
    if bytes.len() < 8 {
        return Err(ConvertError::InvalidLength(bytes.len()).into());
    }
    let (rev, key) = bytes.split_at(8);
    Ok((revision_from_key(rev)?, key.to_vec()))
}
