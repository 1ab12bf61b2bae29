//! PXE Deployer - PoE 节点网络启动部署工具
//!
//! Usage:
//! - Deploy the configured image: `pxe-deployer`
//! - Custom node list: `pxe-deployer --nodes /etc/pxe/nodes.json`
//! - Newest local build: `pxe-deployer --latest-local`
//! - Deploy then run tests: `pxe-deployer --run-tests`

use std::path::PathBuf;

use pxe_deployer::config::DeployerConfig;
use pxe_deployer::RunOptions;

/// 解析命令行参数
fn parse_args() -> RunOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = RunOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--nodes" if i + 1 < args.len() => {
                options.nodes_file = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--image" if i + 1 < args.len() => {
                options.image = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--latest-local" => {
                options.latest_local = true;
                i += 1;
            }
            "--run-tests" => {
                options.run_tests = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(2);
            }
        }
    }

    options
}

fn print_help() {
    println!("PXE Deployer - PoE 节点网络启动部署工具");
    println!();
    println!("USAGE:");
    println!("    pxe-deployer [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --nodes <FILE>    Node descriptor JSON (overrides PXE_NODES_FILE)");
    println!("    --image <PATH>    Image to deploy (overrides PXE_SDCARD_IMAGE_PATH)");
    println!("    --latest-local    Deploy the newest build in PXE_ARTIFACTS_DIR");
    println!("    --run-tests       Run the Robot Framework suite after a successful deploy");
    println!("    -h, --help        Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    ROUTER_HOST, ROUTER_USERNAME, ROUTER_PASSWORD, PXE_SERVER_IP, PXE_FS_ROOT, ...");
}

fn main() {
    let options = parse_args();
    let config = DeployerConfig::from_env();

    if let Err(e) = pxe_deployer::init_tracing(config.pxe_server.logs_dir.as_deref()) {
        eprintln!("Failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create runtime");
            std::process::exit(1);
        }
    };

    match rt.block_on(pxe_deployer::run(config, options)) {
        Ok(true) => {}
        Ok(false) => {
            tracing::error!("Deployment failed");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Deployment aborted");
            std::process::exit(1);
        }
    }
}
