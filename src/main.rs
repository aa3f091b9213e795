// =============================================================================
// EMBERLINK v0.4 - Main Entry Point
// Off-chain payment channel node core
// =============================================================================

use clap::{Parser, Subcommand};
use log::info;
use rand::thread_rng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::sync::{Arc, Mutex};

use emberlink::routing::Router;
use emberlink::rpc::RpcServer;
use emberlink::RPC_PORT;

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(name = "emberlink")]
#[command(version)]
#[command(about = "Emberlink - off-chain payment channel node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node with the admin RPC listening
    Start {
        /// Port for the admin JSON-RPC server
        #[arg(long, default_value_t = RPC_PORT)]
        rpc_port: u16,
    },
    /// Print a freshly generated node id
    Keygen,
}

fn generate_identity() -> PublicKey {
    let secp = Secp256k1::new();
    let secret = SecretKey::new(&mut thread_rng());
    PublicKey::from_secret_key(&secp, &secret)
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Start { rpc_port } => {
            let local_id = generate_identity();
            info!("Node id: {}", hex::encode(local_id.serialize()));

            let router = Arc::new(Mutex::new(Router::new(local_id)));
            info!("Starting admin RPC on port {}", rpc_port);
            RpcServer::new(router).serve(rpc_port).await;
        }
        Command::Keygen => {
            println!("{}", hex::encode(generate_identity().serialize()));
        }
    }
}
