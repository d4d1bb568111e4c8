// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! fnplane CLI
//!
//! Deploys and invokes functions against a local SQLite content store,
//! running code tiers through local interpreters.
//!
//! Usage:
//!   fnplane <command> [options]
//!
//! Commands:
//!   deploy <metadata.json> [--code <file>]
//!   invoke <id> [--input <json>] [--version <v>]
//!   rollback <id> <version>
//!   versions <id>
//!   history <id>
//!   delete <id>
//!   list

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use fnplane_dispatch::backend::process::ProcessSandbox;
use fnplane_dispatch::{DispatchConfig, Dispatcher, FunctionTarget};
use fnplane_store::config::CodeStorageConfig;
use fnplane_store::{CodeStorage, FunctionMetadata, FunctionRegistry, SqliteContentStore};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

fn print_usage() {
    eprintln!(
        r#"Usage: fnplane <command> [options]

Deploy and invoke functions.

COMMANDS:
    deploy <metadata.json>          Deploy a function version
    invoke <id>                     Invoke a function
    rollback <id> <version>         Make an earlier version current
    versions <id>                   List deployed versions, newest first
    history <id>                    Show deployment history
    delete <id>                     Delete a function and its code
    list                            List function ids

DEPLOY OPTIONS:
    --code <file>                   Compiled code to store with the version

INVOKE OPTIONS:
    --input <json>                  Input document (default: {{}})
    --version <v>                   Version to invoke (default: current)

ENVIRONMENT:
    FNPLANE_DATABASE_URL            SQLite URL (default: sqlite:.data/fnplane.db?mode=rwc)
    RUST_LOG                        Log filter (default: fnplane=info)
"#
    );
}

#[derive(Debug)]
enum Command {
    Deploy {
        metadata_path: String,
        code_path: Option<String>,
    },
    Invoke {
        function_id: String,
        input: Value,
        version: Option<String>,
    },
    Rollback {
        function_id: String,
        version: String,
    },
    Versions {
        function_id: String,
    },
    History {
        function_id: String,
    },
    Delete {
        function_id: String,
    },
    List,
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "deploy" => {
            let mut metadata_path: Option<String> = None;
            let mut code_path: Option<String> = None;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--code" => {
                        i += 1;
                        code_path = Some(args.get(i).ok_or("--code requires a path")?.clone());
                    }
                    arg if arg.starts_with("--") => {
                        return Err(format!("Unknown argument: {}", arg));
                    }
                    arg if metadata_path.is_none() => metadata_path = Some(arg.to_string()),
                    arg => return Err(format!("Unexpected argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Deploy {
                metadata_path: metadata_path.ok_or("Metadata file required")?,
                code_path,
            })
        }
        "invoke" => {
            let function_id = args.get(2).ok_or("Function ID required")?.clone();
            let mut input = json!({});
            let mut version: Option<String> = None;

            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--input" => {
                        i += 1;
                        let raw = args.get(i).ok_or("--input requires a JSON document")?;
                        input = serde_json::from_str(raw)
                            .map_err(|e| format!("Invalid input JSON: {}", e))?;
                    }
                    "--version" => {
                        i += 1;
                        version = Some(args.get(i).ok_or("--version requires a value")?.clone());
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Invoke {
                function_id,
                input,
                version,
            })
        }
        "rollback" => {
            let function_id = args.get(2).ok_or("Function ID required")?.clone();
            let version = args.get(3).ok_or("Version required")?.clone();
            Ok(Command::Rollback {
                function_id,
                version,
            })
        }
        "versions" => {
            let function_id = args.get(2).ok_or("Function ID required")?.clone();
            Ok(Command::Versions { function_id })
        }
        "history" => {
            let function_id = args.get(2).ok_or("Function ID required")?.clone();
            Ok(Command::History { function_id })
        }
        "delete" => {
            let function_id = args.get(2).ok_or("Function ID required")?.clone();
            Ok(Command::Delete { function_id })
        }
        "list" => Ok(Command::List),
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

/// Create the directory of a file-backed SQLite URL.
fn ensure_database_dir(url: &str) -> std::io::Result<()> {
    if url.contains(":memory:") {
        return Ok(());
    }
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);

    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

struct App {
    registry: FunctionRegistry,
    storage: CodeStorage,
    target: FunctionTarget,
}

async fn build_app() -> anyhow::Result<App> {
    let config = DispatchConfig::from_env()?;
    let storage_config = CodeStorageConfig::from_env()?;

    ensure_database_dir(&config.database_url)?;
    let store = Arc::new(SqliteContentStore::connect(&config.database_url).await?);
    debug!(database_url = %config.database_url, "Connected to content store");

    let registry = FunctionRegistry::new(store.clone());
    let storage = CodeStorage::with_config(store, storage_config);

    let dispatcher = Dispatcher::builder()
        .sandbox(Arc::new(ProcessSandbox::new()))
        .registry(registry.clone())
        .code_storage(storage.clone())
        .config(config)
        .build()?;

    Ok(App {
        registry,
        storage,
        target: FunctionTarget::new(dispatcher),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).map_err(|e| e.to_string())?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fnplane=info,fnplane_dispatch=info,fnplane_store=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        debug!("No .env file loaded: {}", e);
    }

    let cmd = match parse_args() {
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let app = match build_app().await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match execute_command(&app, cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute_command(app: &App, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Deploy {
            metadata_path,
            code_path,
        } => {
            let raw = fs::read_to_string(&metadata_path)
                .map_err(|e| format!("Failed to read {}: {}", metadata_path, e))?;
            let metadata: FunctionMetadata = serde_json::from_str(&raw)
                .map_err(|e| format!("Invalid metadata in {}: {}", metadata_path, e))?;

            let code = match &code_path {
                Some(path) => {
                    Some(fs::read(path).map_err(|e| format!("Failed to read {}: {}", path, e))?)
                }
                None => None,
            };

            let deployed = app
                .registry
                .deploy(metadata)
                .await
                .map_err(|e| e.to_string())?;

            if let Some(code) = code {
                app.storage
                    .put_large(&deployed.id, &code, Some(deployed.version.as_str()))
                    .await
                    .map_err(|e| e.to_string())?;
                app.storage
                    .put_large(&deployed.id, &code, None)
                    .await
                    .map_err(|e| e.to_string())?;
            }

            print_json(&deployed)?;
        }

        Command::Invoke {
            function_id,
            input,
            version,
        } => {
            let result = match &version {
                Some(v) => app.target.invoke_version(&function_id, v, input).await,
                None => app.target.invoke(&function_id, input).await,
            };
            print_json(&result)?;

            if result.status >= 400 {
                return Err(format!(
                    "{} returned {}",
                    function_id,
                    result.error_message().unwrap_or("an error")
                ));
            }
        }

        Command::Rollback {
            function_id,
            version,
        } => {
            let metadata = app
                .registry
                .rollback(&function_id, &version)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&metadata)?;
        }

        Command::Versions { function_id } => {
            let versions = app
                .registry
                .get_versions(&function_id)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&versions)?;
        }

        Command::History { function_id } => {
            let history = app
                .registry
                .get_deployment_history(&function_id)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&history)?;
        }

        Command::Delete { function_id } => {
            let deleted = app
                .registry
                .delete(&function_id)
                .await
                .map_err(|e| e.to_string())?;
            let slots = app
                .storage
                .delete_all(&function_id)
                .await
                .map_err(|e| e.to_string())?;
            if !deleted && slots > 0 {
                warn!(function_id = %function_id, slots, "Removed code of an unregistered function");
            }
            print_json(&json!({ "deleted": deleted, "codeSlotsDeleted": slots }))?;
        }

        Command::List => {
            let ids = app
                .registry
                .list_functions()
                .await
                .map_err(|e| e.to_string())?;
            print_json(&ids)?;
        }

        Command::Help => print_usage(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_no_command() {
        let result = parse_args_from_vec(&args(&["fnplane"]));
        assert_eq!(result.unwrap_err(), "No command specified");
    }

    #[test]
    fn test_parse_unknown_command() {
        let result = parse_args_from_vec(&args(&["fnplane", "launch"]));
        assert!(result.unwrap_err().contains("Unknown command"));
    }

    #[test]
    fn test_parse_deploy() {
        let cmd = parse_args_from_vec(&args(&["fnplane", "deploy", "fn.json", "--code", "fn.js"]))
            .unwrap();
        match cmd {
            Command::Deploy {
                metadata_path,
                code_path,
            } => {
                assert_eq!(metadata_path, "fn.json");
                assert_eq!(code_path.as_deref(), Some("fn.js"));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let result = parse_args_from_vec(&args(&["fnplane", "deploy"]));
        assert_eq!(result.unwrap_err(), "Metadata file required");

        let result = parse_args_from_vec(&args(&["fnplane", "deploy", "fn.json", "--code"]));
        assert_eq!(result.unwrap_err(), "--code requires a path");
    }

    #[test]
    fn test_parse_invoke() {
        let cmd = parse_args_from_vec(&args(&[
            "fnplane",
            "invoke",
            "adder",
            "--input",
            r#"{"a": 3, "b": 7}"#,
            "--version",
            "1.0.0",
        ]))
        .unwrap();
        match cmd {
            Command::Invoke {
                function_id,
                input,
                version,
            } => {
                assert_eq!(function_id, "adder");
                assert_eq!(input, json!({"a": 3, "b": 7}));
                assert_eq!(version.as_deref(), Some("1.0.0"));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cmd = parse_args_from_vec(&args(&["fnplane", "invoke", "adder"])).unwrap();
        assert!(matches!(cmd, Command::Invoke { ref input, .. } if *input == json!({})));

        let result = parse_args_from_vec(&args(&["fnplane", "invoke", "adder", "--input", "{"]));
        assert!(result.unwrap_err().contains("Invalid input JSON"));
    }

    #[test]
    fn test_parse_registry_commands() {
        assert!(matches!(
            parse_args_from_vec(&args(&["fnplane", "rollback", "f", "1.0.0"])).unwrap(),
            Command::Rollback { ref version, .. } if version == "1.0.0"
        ));
        assert_eq!(
            parse_args_from_vec(&args(&["fnplane", "rollback", "f"])).unwrap_err(),
            "Version required"
        );
        assert!(matches!(
            parse_args_from_vec(&args(&["fnplane", "versions", "f"])).unwrap(),
            Command::Versions { .. }
        ));
        assert!(matches!(
            parse_args_from_vec(&args(&["fnplane", "history", "f"])).unwrap(),
            Command::History { .. }
        ));
        assert!(matches!(
            parse_args_from_vec(&args(&["fnplane", "delete", "f"])).unwrap(),
            Command::Delete { .. }
        ));
        assert!(matches!(
            parse_args_from_vec(&args(&["fnplane", "list"])).unwrap(),
            Command::List
        ));
        assert!(matches!(
            parse_args_from_vec(&args(&["fnplane", "--help"])).unwrap(),
            Command::Help
        ));
    }

    #[test]
    fn test_ensure_database_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("fnplane.db");
        let url = format!("sqlite:{}?mode=rwc", db.display());

        ensure_database_dir(&url).unwrap();
        assert!(dir.path().join("nested").is_dir());

        ensure_database_dir("sqlite::memory:").unwrap();
    }
}
