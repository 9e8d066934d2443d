use anyhow::Result;

fn main() -> Result<()> {
    oibox::cli::run()
}
