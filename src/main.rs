use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = credorium::config::Config::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(credorium::run(cfg))
}
