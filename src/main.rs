use std::io::{self, Write};
use std::time::Duration;

use pbft_ledger::cli;
use pbft_ledger::registry::PeerId;
use pbft_ledger::replica::Replica;

fn main() {
    let id = PeerId(prompt_u32("peer id: "));
    let port = prompt_u32("port number: ") as u16;

    ledger_utils::log::initialize_logging(id.0);

    let accept_timeout_ms: u64 = ledger_utils::config::env2var_or("LEDGER_ACCEPT_TIMEOUT_MS", 1000);
    let replica = Replica::new(id, port);
    replica
        .start(Duration::from_millis(accept_timeout_ms))
        .expect("failed to bind the replica's listener");

    println!("replica {} waiting on port {}", id, port);

    cli::run(&replica);
}

fn prompt_u32(label: &str) -> u32 {
    loop {
        print!("{}", label);
        io::stdout().flush().ok();
        let mut line = String::new();
        io::stdin().read_line(&mut line).expect("failed to read from stdin");
        if let Ok(value) = line.trim().parse() {
            return value;
        }
        println!("please enter a number");
    }
}
