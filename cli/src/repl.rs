// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The interactive shell.
//!
//! One command per line with shell-like tokenization; positional
//! arguments and `--flag` options map straight onto the tool schemas.
//! `usecf` sets the implicit column family prefixed to every call.
//! Ctrl-C clears the current line (and cancels a running `watch`); it
//! does not interrupt a running tool call.

use std::time::Duration;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use quarry_store::watch::{watch, WatchOptions};
use quarry_tools::{ToolContext, ToolRegistry};

use crate::output;

/// Fields that are booleans in the tool schemas; their flags take no
/// value.
const BOOL_FIELDS: &[&str] = &[
    "reverse",
    "use_regex",
    "case_sensitive",
    "tick",
    "dry_run",
    "include_values",
    "timestamps",
    "timestamp",
];

/// REPL names to registry names, where they differ.
fn tool_name_of(command: &str) -> &str {
    match command {
        "prefix" => "prefix_scan",
        "jsonquery" => "json_query",
        "jsonpath" => "json_path",
        "listcf" => "list_column_families",
        "createcf" => "create_column_family",
        "dropcf" => "drop_column_family",
        "export" => "export_csv",
        other => other,
    }
}

fn positional_fields(tool: &str) -> &'static [&'static str] {
    match tool {
        "get" | "delete" => &["key"],
        "put" => &["key", "value"],
        "prefix_scan" => &["prefix"],
        "search" => &["key_pattern"],
        "json_query" => &["field", "value"],
        "json_path" => &["key", "path"],
        "create_column_family" | "drop_column_family" => &["name"],
        _ => &[],
    }
}

pub async fn run(ctx: ToolContext) -> anyhow::Result<()> {
    let registry = ToolRegistry::standard();
    let mut current_cf = "default".to_owned();
    let mut editor = DefaultEditor::new()?;

    println!("quarry shell - type 'help' for commands, 'exit' to leave");

    loop {
        let prompt = format!("quarry [{current_cf}]> ");
        match editor.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                let tokens = match tokenize(line) {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        eprintln!("parse error: {e}");
                        continue;
                    }
                };

                match tokens[0].as_str() {
                    "exit" | "quit" => break,
                    "help" => print_help(),
                    "usecf" => {
                        if let Some(cf) = tokens.get(1) {
                            current_cf = cf.clone();
                            println!("using column family '{current_cf}'");
                        } else {
                            println!("current column family: '{current_cf}'");
                        }
                    }
                    "watch" => {
                        run_watch(&ctx, &current_cf, &tokens[1..]).await;
                    }
                    command => {
                        let tool = tool_name_of(command);
                        let args = match build_args(tool, &current_cf, &tokens[1..]) {
                            Ok(args) => args,
                            Err(e) => {
                                eprintln!("parse error: {e}");
                                continue;
                            }
                        };
                        match registry.dispatch(&ctx, tool, args).await {
                            Ok(result) => output::print_result(&result),
                            Err(e) => output::print_error(&e),
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {e}");
                break;
            }
        }
    }

    Ok(())
}

/// Streamed watch with Ctrl-C cancellation; the only REPL command that
/// does not go through the dispatcher, because it prints as it goes.
async fn run_watch(ctx: &ToolContext, cf: &str, args: &[String]) {
    let interval = args
        .iter()
        .position(|t| t.as_str() == "--interval-ms")
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(Duration::from_secs(1), Duration::from_millis);

    let store = match ctx.manager.store() {
        Ok(store) => store,
        Err(e) => {
            output::print_error(&e);
            return;
        }
    };

    let token = CancellationToken::new();
    let interrupt = token.clone();
    let ctrl_c = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        interrupt.cancel();
    });

    eprintln!("watching '{cf}', Ctrl-C to stop");
    let options = WatchOptions {
        interval,
        timestamps: false,
    };
    if let Err(e) = watch(&store, cf, &options, token, |entry| {
        println!("{} => {}", entry.key_display, entry.value_display);
    })
    .await
    {
        output::print_error(&e);
    }
    ctrl_c.abort();
}

/// Tools whose schema has no column family field.
const NO_CF_TOOLS: &[&str] = &[
    "list_column_families",
    "create_column_family",
    "drop_column_family",
];

/// Map positional tokens and `--flag` options onto the tool's fields.
fn build_args(tool: &str, cf: &str, tokens: &[String]) -> Result<Value, String> {
    let mut args = serde_json::Map::new();
    if !NO_CF_TOOLS.contains(&tool) {
        args.insert("cf".to_owned(), json!(cf));
    }

    let positionals = positional_fields(tool);
    let mut next_positional = 0;

    let mut index = 0;
    while index < tokens.len() {
        let token = &tokens[index];
        if let Some(flag) = token.strip_prefix("--") {
            let field = flag.replace('-', "_");
            if BOOL_FIELDS.contains(&field.as_str()) {
                args.insert(field, json!(true));
                index += 1;
            } else {
                let value = tokens
                    .get(index + 1)
                    .ok_or_else(|| format!("flag --{flag} expects a value"))?;
                args.insert(field, parse_scalar(value));
                index += 2;
            }
        } else {
            let field = positionals
                .get(next_positional)
                .ok_or_else(|| format!("unexpected argument '{token}'"))?;
            args.insert((*field).to_owned(), json!(token));
            next_positional += 1;
            index += 1;
        }
    }

    Ok(Value::Object(args))
}

fn parse_scalar(token: &str) -> Value {
    match token.parse::<u64>() {
        Ok(number) => json!(number),
        Err(_) => json!(token),
    }
}

/// Shell-like tokenization: whitespace-separated, single or double
/// quotes group, backslash escapes inside double quotes.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated single quote".to_owned()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => return Err("dangling escape".to_owned()),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated double quote".to_owned()),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => {
                    in_token = true;
                    current.push(escaped);
                }
                None => return Err("dangling escape".to_owned()),
            },
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    if tokens.is_empty() {
        return Err("empty command".to_owned());
    }
    Ok(tokens)
}

fn print_help() {
    println!(
        "commands:
  get <key> [--timestamp]             put <key> <value>
  delete <key>                        scan [--start K] [--end K] [--reverse] [--limit N] [--after CURSOR]
  prefix <prefix> [--limit N]         search [<key-pattern>] [--value_pattern P] [--use-regex] [--tick]
  jsonquery <field> <value>           jsonpath <key> <path>
  last                                listcf
  createcf <name>                     dropcf <name>
  export [--file-path F]              stats [--cf NAME]
  watch [--interval-ms N]             transform [--value-expr E] [--key-expr E] [--dry-run] ...
  usecf <name>                        help, exit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_splits_and_respects_quotes() {
        assert_eq!(
            tokenize("put user:1 \"hello world\"").unwrap(),
            vec!["put", "user:1", "hello world"]
        );
        assert_eq!(
            tokenize("get 'a b'").unwrap(),
            vec!["get", "a b"]
        );
        assert_eq!(
            tokenize(r#"put k "say \"hi\"""#).unwrap(),
            vec!["put", "k", r#"say "hi""#]
        );
        assert!(tokenize("get \"unterminated").is_err());
        assert!(tokenize("   ").is_err());
    }

    #[test]
    fn empty_quotes_make_empty_tokens() {
        assert_eq!(tokenize("put k ''").unwrap(), vec!["put", "k", ""]);
    }

    #[test]
    fn no_cf_tools_do_not_get_one() {
        let args = build_args("list_column_families", "events", &tokens(&[])).unwrap();
        assert_eq!(args, serde_json::json!({}));

        let args = build_args("create_column_family", "events", &tokens(&["logs"])).unwrap();
        assert_eq!(args, serde_json::json!({"name": "logs"}));
    }

    #[test]
    fn args_map_positionals_and_flags() {
        let args = build_args("put", "events", &tokens(&["user:1", "A"])).unwrap();
        assert_eq!(
            args,
            serde_json::json!({"cf": "events", "key": "user:1", "value": "A"})
        );

        let args = build_args(
            "scan",
            "default",
            &tokens(&["--limit", "5", "--reverse", "--start", "a"]),
        )
        .unwrap();
        assert_eq!(args["limit"], 5);
        assert_eq!(args["reverse"], true);
        assert_eq!(args["start"], "a");

        let err = build_args("get", "default", &tokens(&["k1", "k2"])).unwrap_err();
        assert!(err.contains("unexpected argument"));

        let err = build_args("scan", "default", &tokens(&["--limit"])).unwrap_err();
        assert!(err.contains("expects a value"));
    }

    fn tokens(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }
}
