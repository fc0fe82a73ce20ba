//! Operator console — line commands over stdin.
//!
//! A thin layer: every command calls straight into an engine and prints
//! the outcome. Role only shapes the help text; either role accepts the
//! full command set, because the role is advisory end to end.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use cairn_core::wire::NodeRole;
use cairn_services::{snapshot, FileReceiver, PeerRegistry, SendTarget};

use crate::presence;
use crate::sender::Sender;
use crate::transport::Radio;

pub struct Console {
    pub node_id: String,
    pub role: NodeRole,
    pub radio: Arc<Radio>,
    pub peers: PeerRegistry,
    pub sender: Arc<Sender>,
    pub receiver: Arc<FileReceiver>,
}

impl Console {
    /// Read commands until `/quit` or stdin closes.
    pub async fn run(&self) -> Result<()> {
        self.print_help();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if !self.dispatch_command(line.trim()).await {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Returns false when the operator quits.
    async fn dispatch_command(&self, line: &str) -> bool {
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.first() {
            Some(first) => first.to_ascii_lowercase(),
            None => return true,
        };

        match (command.as_str(), &words[1..]) {
            ("/quit", _) => {
                println!("Exiting...");
                return false;
            }
            ("/send", [path]) => {
                self.do_send(path, SendTarget::Broadcast).await;
            }
            ("/sendto", [path, id]) => {
                self.do_send(path, SendTarget::Node { id: id.to_string() })
                    .await;
            }
            ("/discover", _) => {
                match presence::discover(&self.radio, &self.node_id).await {
                    Ok(()) => println!("Discovery request sent; responses arrive as announces."),
                    Err(e) => println!("Discovery failed: {e}"),
                }
            }
            ("/announce", _) => {
                match presence::announce(&self.radio, &self.node_id, self.role).await {
                    Ok(()) => println!("Announced presence as {}", self.node_id),
                    Err(e) => println!("Failed to announce presence: {e}"),
                }
            }
            ("/nodes", _) => self.print_nodes(),
            ("/files", _) => self.print_files().await,
            _ => {
                println!("Invalid command.");
                self.print_help();
            }
        }
        true
    }

    async fn do_send(&self, path: &str, target: SendTarget) {
        match self.sender.send_file(Path::new(path), target).await {
            Ok(()) => println!("Transfer complete: {path}"),
            Err(e) => println!("Transfer failed: {e:#}"),
        }
    }

    fn print_nodes(&self) {
        let peers = snapshot(&self.peers);
        if peers.is_empty() {
            println!("\nNo nodes discovered yet. Try running /discover first.");
            return;
        }
        println!("\nKnown nodes:");
        for peer in peers {
            println!(
                "  {} (role: {}, last seen: {}s ago)",
                peer.id,
                peer.role,
                peer.idle.as_secs()
            );
        }
    }

    async fn print_files(&self) {
        let names = self.receiver.in_progress().await;
        if names.is_empty() {
            println!("\nNo transfers in progress.");
            return;
        }
        println!("\nReceiving:");
        for name in names {
            println!("  {name}");
        }
    }

    fn print_help(&self) {
        println!("\nCommands:");
        if self.role == NodeRole::Sender {
            println!("  /send <filepath>              - Send file to all nodes");
            println!("  /sendto <filepath> <node_id>  - Send file to specific node");
            println!("  /discover                     - Discover other nodes");
        }
        println!("  /announce                     - Announce presence");
        println!("  /nodes                        - List known nodes");
        println!("  /files                        - List transfers in progress");
        println!("  /quit                         - Exit");
    }
}
