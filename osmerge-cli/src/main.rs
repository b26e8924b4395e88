//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() -> eyre::Result<()> {
    env_logger::init();
    osmerge_cli::run()?;
    Ok(())
}
