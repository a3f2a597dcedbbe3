/***************************************************************************************************
The operator menu: a tiny stdin/stdout loop over a `Replica`. Every option here is a thin call into
the replica's public API (submit, connect, toggle_byzantine, chain_snapshot); the CLI owns no
protocol state of its own.
***************************************************************************************************/

use std::io::{self, Write};
use std::sync::Arc;

use crate::registry::PeerId;
use crate::replica::Replica;

/// Runs the interactive menu on the current thread until the operator picks "quit". Blocks on
/// stdin between choices; the replica's listener thread keeps servicing the network in the
/// background regardless of what the operator is doing.
pub fn run(replica: &Arc<Replica>) {
    loop {
        println!("1. add peer");
        println!("2. add block");
        println!("3. print chain");
        println!("4. quit");
        println!("5. toggle byzantine");

        match prompt("choose an option: ").trim() {
            "1" => add_peer(replica),
            "2" => add_block(replica),
            "3" => print_chain(replica),
            "4" => {
                replica.shutdown();
                break;
            }
            "5" => toggle_byzantine(replica),
            other => println!("not a valid option: {}", other),
        }
    }
}

fn add_peer(replica: &Arc<Replica>) {
    let peer_id = match prompt("peer id to connect to: ").trim().parse::<u32>() {
        Ok(v) => PeerId(v),
        Err(_) => {
            println!("that's not a peer id");
            return;
        }
    };
    let peer_port = match prompt("peer's port: ").trim().parse::<u16>() {
        Ok(v) => v,
        Err(_) => {
            println!("that's not a port");
            return;
        }
    };

    match replica.connect(peer_id, peer_port) {
        Ok(()) => println!("connected to peer {} on port {}", peer_id, peer_port),
        Err(e) => println!("failed to connect to peer {} on port {}: {}", peer_id, peer_port, e),
    }
}

fn add_block(replica: &Arc<Replica>) {
    let data = prompt("block data: ").trim_end().as_bytes().to_vec();
    match replica.submit(data) {
        Ok(()) => println!(" -----! starting PBFT !-----\n"),
        Err(e) => println!("{}", e),
    }
}

fn print_chain(replica: &Arc<Replica>) {
    println!("current chain:");
    match replica.chain_snapshot() {
        Some(records) => {
            for record in records {
                println!("{:?}", record);
            }
        }
        None => println!("none"),
    }
}

fn toggle_byzantine(replica: &Arc<Replica>) {
    let now_byzantine = replica.toggle_byzantine();
    println!("byzantine status: {}", now_byzantine);
}

fn prompt(label: &str) -> String {
    print!("{}", label);
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line).expect("failed to read from stdin");
    line
}
