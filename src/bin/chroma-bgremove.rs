//! Chroma-key background removal CLI tool
//!
//! Removes user-picked colors from images, either once (`remove`) or as a
//! long-running engine driven by JSON lines on stdin (`serve`).

#[cfg(feature = "cli")]
use chroma_bgremove::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() {
    // Exit explicitly: a stdin read still parked on the blocking pool would
    // otherwise keep the runtime from shutting down.
    let code = match cli::main().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        },
    };
    std::process::exit(code);
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
