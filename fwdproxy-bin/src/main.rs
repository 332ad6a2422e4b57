use clap::Parser;
use fwdproxy_bin::run;
use fwdproxy_core::BoxError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "/etc/fwdproxy/config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    run(&args.config).await
}
