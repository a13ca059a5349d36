//! # textsync CLI
//!
//! Command-line utilities for encoding, routing, and debugging.

use anyhow::{Context, Result};
use std::env;
use textsync_adapter_docstore::{decode_document_id, encode_document_id};
use textsync_core::reason::EditReason;
use textsync_core::DocumentId;
use textsync_proto::TopicScheme;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode" => {
            if args.len() < 3 {
                eprintln!("Usage: textsync encode <document-id>");
                std::process::exit(1);
            }
            println!("{}", encode_document_id(&args[2]));
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: textsync decode <encoded>");
                std::process::exit(1);
            }
            let decoded = decode_document_id(&args[2]).context("Failed to decode")?;
            println!("{decoded}");
        }
        "topic" => {
            if args.len() < 4 {
                eprintln!("Usage: textsync topic <tenant> <document-id>");
                std::process::exit(1);
            }
            let scheme = TopicScheme::new(args[2].as_str());
            let channel = DocumentId::new(args[3].as_str()).sync_channel();
            println!("channel:   {channel}");
            println!("revisions: {}", scheme.revisions_for_channel(&channel));
            println!("requests:  {}", scheme.requests());
        }
        "reason" => {
            if args.len() < 4 {
                eprintln!("Usage: textsync reason <existing-reason> <username>...");
                std::process::exit(1);
            }
            let existing = Some(args[2].as_str()).filter(|r| !r.is_empty());
            let mut reason = EditReason::parse(existing);
            reason.extend(&args[3..]);
            println!("{}", reason.render().unwrap_or_default());
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"textsync CLI

USAGE:
    textsync <COMMAND> [OPTIONS]

COMMANDS:
    encode <document-id>                Encode a document id for service URLs (base64url, no padding)
    decode <encoded>                    Decode a base64url-encoded document id
    topic <tenant> <document-id>        Show the sync channel and MQTT topics of a document
    reason <existing> <username>...     Merge usernames into an edit reason
    help                                Show this help message

EXAMPLES:
    textsync encode "wiki/Main Page"
    textsync topic acme "wiki/Main Page"
    textsync reason "Edited by: alice" bob carol
"#
    );
}
