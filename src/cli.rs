use std::io::{self, Write};

use clap::Parser;
use reqwest::blocking::{Client, Response};
use serde_json::{Map, Value};
use shelf::parser::{self, Command};

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Interactive client for a shelf server", long_about = None)]
struct Args {
    #[clap(long, default_value = "http://127.0.0.1:3000")]
    host: String,

    /// Path segment the server mounts its API under, e.g. `api`.
    #[clap(long)]
    api_prefix: Option<String>,
}

struct Session {
    client: Client,
    base: String,
}

fn main() {
    let args = Args::parse();
    print_banner();

    let mut base = args.host.trim_end_matches('/').to_string();
    if let Some(prefix) = args.api_prefix.as_deref().map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        base.push('/');
        base.push_str(prefix);
    }
    let session = Session { client: Client::new(), base };

    match session.client.get(&args.host).send() {
        Ok(_) => println!("[\u{2713}] Connected to shelf at {}!", args.host),
        Err(_) => {
            println!("[\u{2717}] Could not connect to server at {}.", args.host);
            println!("    Make sure to run 'cargo run --bin shelf' in another terminal.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("shelf> ");
        let _ = io::stdout().flush();
        buffer.clear();

        match stdin.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() { continue; }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = session.execute(cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                let upper = buffer.to_uppercase();
                if upper.starts_with("INSERT") || upper.starts_with("UPDATE") {
                    println!("    \u{2139}\u{fe0f}  Hint: text values need double quotes: SET name=\"Blue Eyes\", level=8");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   shelf CLI - JSON collections over HTTP");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. LIST:   LIST cards [WHERE name=\"blue\" AND level=8]");
    println!("2. GET:    GET cards 1");
    println!("3. INSERT: INSERT INTO cards SET name=\"Blue Eyes\", level=8");
    println!("4. UPDATE: UPDATE cards SET price=4.5 WHERE ID=1");
    println!("5. DELETE: DELETE FROM cards WHERE ID=1");
    println!("6. EXIT:   Quit\n");
}

fn to_object(fields: Vec<(String, Value)>) -> Map<String, Value> {
    fields.into_iter().collect()
}

impl Session {
    fn url(&self, parts: &[&str]) -> String {
        let mut url = self.base.clone();
        for part in parts {
            url.push('/');
            url.push_str(part);
        }
        url
    }

    fn execute(&self, cmd: Command) -> Result<(), String> {
        match cmd {
            Command::Help => { print_help(); Ok(()) },
            Command::Exit => Ok(()),
            Command::List { collection, filters } => {
                let resp = self.client.get(self.url(&[&collection])).query(&filters).send().map_err(|e| e.to_string())?;
                print_records(resp)
            },
            Command::Get { collection, id } => {
                let resp = self.client.get(self.url(&[&collection, &id.to_string()])).send().map_err(|e| e.to_string())?;
                print_records(resp)
            },
            Command::Insert { collection, fields } => {
                let resp = self.client.post(self.url(&[&collection])).json(&to_object(fields)).send().map_err(|e| e.to_string())?;
                print_ack(resp)
            },
            Command::Update { collection, id, fields } => {
                let resp = self.client.put(self.url(&[&collection, &id.to_string()])).json(&to_object(fields)).send().map_err(|e| e.to_string())?;
                print_ack(resp)
            },
            Command::Delete { collection, id } => {
                let resp = self.client.delete(self.url(&[&collection, &id.to_string()])).send().map_err(|e| e.to_string())?;
                print_ack(resp)
            },
        }
    }
}

fn print_records(resp: Response) -> Result<(), String> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().map_err(|e| e.to_string())?;
        println!("[\u{2717} {}] {}", status.as_u16(), text);
        return Ok(());
    }

    let value: Value = resp.json().map_err(|e| e.to_string())?;
    match &value {
        Value::Array(items) if items.is_empty() => println!("No records found."),
        Value::Array(items) => {
            println!("\nFound {} record(s):", items.len());
            for item in items {
                println!("  \u{2022} {}", item);
            }
            println!();
        }
        other => println!("{}", serde_json::to_string_pretty(other).map_err(|e| e.to_string())?),
    }
    Ok(())
}

fn print_ack(resp: Response) -> Result<(), String> {
    let status = resp.status();
    let text = resp.text().map_err(|e| e.to_string())?;
    if status.is_success() {
        println!("[\u{2713} OK] {}", text);
        Ok(())
    } else {
        Err(format!("{} {}", status.as_u16(), text))
    }
}
