//! Thin admin CLI: dials a node directly and performs a client-facing
//! operation against the ring it belongs to. Grounded in the teacher's
//! `validate_cluster.rs`, which likewise dials arbitrary nodes with a raw
//! `ChordClient` to inspect cluster state; here the same client is used to
//! drive Put/Get/Delete rather than to read back finger/successor state.

use clap::{Parser, Subcommand};
use tonic::transport::Channel;
use tonic::Request;

use chord_dht::ring::{hash, TTL};
use chord_dht::rpc::proto::chord_client::ChordClient;
use chord_dht::rpc::proto::{
    DeleteDataRequest, Empty, FindSuccessorRequest, KeyRequest, PutDataRequest,
};

#[derive(Parser, Debug)]
#[command(name = "chord-client")]
struct Cli {
    /// Address of any node already in the ring
    #[arg(long)]
    via: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    /// Prints the successor list of the node addressed by `--via`.
    SuccList,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    let mut entry = ChordClient::connect(format!("http://{}", args.via)).await?;

    match args.command {
        Command::Put { key, value } => {
            let owner = find_owner(&mut entry, &key).await?;
            let mut owner_client = ChordClient::connect(format!("http://{owner}")).await?;
            owner_client
                .put_data(Request::new(PutDataRequest {
                    is_backup: false,
                    key,
                    value,
                }))
                .await?;
            println!("ok");
        }
        Command::Get { key } => {
            let owner = find_owner(&mut entry, &key).await?;
            let mut owner_client = ChordClient::connect(format!("http://{owner}")).await?;
            let reply = owner_client
                .get_data_by_key(Request::new(KeyRequest { key }))
                .await?;
            println!("{}", reply.into_inner().value);
        }
        Command::Delete { key } => {
            let owner = find_owner(&mut entry, &key).await?;
            let mut owner_client = ChordClient::connect(format!("http://{owner}")).await?;
            owner_client
                .delete_data(Request::new(DeleteDataRequest {
                    is_backup: false,
                    key,
                }))
                .await?;
            println!("ok");
        }
        Command::SuccList => {
            let reply = entry.get_succ_list(Request::new(Empty {})).await?;
            for (i, addr) in reply.into_inner().addresses.iter().enumerate() {
                println!("{i}: {addr}");
            }
        }
    }

    Ok(())
}

async fn find_owner(
    client: &mut ChordClient<Channel>,
    key: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let reply = client
        .find_successor(Request::new(FindSuccessorRequest {
            id: hash(key),
            ttl: TTL as i32,
        }))
        .await?;
    Ok(reply.into_inner().address)
}
