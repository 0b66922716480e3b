use anyhow::Result;
use clap::Parser;

use gotmpl_ls::{SERVER_NAME, SERVER_VERSION, logging, server};

/// Build date injected by release builds; source builds say so.
const BUILD_DATE: &str = match option_env!("GOTMPL_LS_BUILD_DATE") {
    Some(date) => date,
    None => "unreleased",
};

#[derive(Parser)]
#[command(name = "gotmpl-ls", about = "Language server for Go text/html template files", disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long)]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{SERVER_NAME} -- version {SERVER_VERSION} {BUILD_DATE}");
        return Ok(());
    }

    logging::init();
    tracing::info!(version = SERVER_VERSION, "starting language server on stdio");

    let result = server::run(tokio::io::stdin(), tokio::io::stdout()).await;
    match &result {
        Ok(()) => tracing::info!("server stopped cleanly"),
        Err(err) => tracing::error!("server terminated: {err:#}"),
    }
    result
}
