use clap::Parser;
use foot_viewer::{ViewerConfig, config::CliArgs, flow};

fn main() -> anyhow::Result<()> {
    let config = CliArgs::parse().apply(ViewerConfig::default())?;
    flow::run(config)
}
