use clap::Parser;
use raftkv::server::{Config, Server};
use raftkv::types::ReplicaId;

#[derive(Parser)]
struct Args {
    /// UDP port of the shared message bus.
    port: u16,

    /// This replica's id (four hex characters).
    #[arg(value_parser = parse_replica_id)]
    id: ReplicaId,

    /// Ids of the other replicas in the cluster.
    #[arg(required = true, value_parser = parse_replica_id)]
    others: Vec<ReplicaId>,
}

fn parse_replica_id(raw: &str) -> Result<ReplicaId, String> {
    if raw.len() != 4 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("replica id must be four hex characters, got: {raw}"));
    }
    Ok(ReplicaId::from(raw))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simplelog::SimpleLogger::init(simplelog::LevelFilter::Info, simplelog::Config::default())?;

    let args = Args::parse();
    Server::start(Config {
        port: args.port,
        id: args.id,
        peers: args.others,
    })?
    .run()?;

    Ok(())
}
