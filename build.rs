fn main() -> Result<(), Box<dyn std::error::Error>> {
    // `etx version` reports the commit it was built from.
    vergen::EmitBuilder::builder()
        .git_sha(true)
        .git_branch()
        .emit()
        .expect("Unable to generate build info");

    Ok(())
}
