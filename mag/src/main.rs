//! `mag` command-line entry point.
//!
//! Every subcommand works against the project rooted at `--root` (default:
//! the current directory), with state under `.mag/`.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mag::controller::TaskEvent;
use mag::core::control::{ControlCommand, parse_control_command};
use mag::core::directive::render_todo_list;
use mag::core::policy::{Operation, PolicySettings};
use mag::core::todo::{TaskUpdate, TodoStore};
use mag::error::ValidationError;
use mag::exit_codes;
use mag::io::config::{AppConfig, ProjectPaths, load_config, write_config};
use mag::io::policy_store::{load_or_create_policy, load_policy, write_policy};
use mag::repl::parse_answer;
use mag::session::{Answer, AutoApprove, Confirm, LocalSession};

#[derive(Parser)]
#[command(
    name = "mag",
    version,
    about = "Local assistant with a policy-checked todo executor"
)]
struct Cli {
    /// Project root; state lives in `<root>/.mag/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.mag/config.toml` and `.mag/policy.json` if missing.
    Init {
        /// Overwrite existing files with defaults.
        #[arg(short, long)]
        force: bool,
    },
    /// Manage the todo list.
    #[command(subcommand)]
    Todo(TodoCommand),
    /// Inspect or check the policy.
    #[command(subcommand)]
    Policy(PolicyCommand),
    /// Execute todos: `all`, `next`, `until <id>`, `<start>-<end>` or `<id>`.
    Do {
        #[arg(required = true, num_args = 1..)]
        target: Vec<String>,
    },
    /// Show execution state and todo counts.
    Status,
    /// Send one chat turn; todo directives in the reply are applied.
    Chat {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// Ask for one concrete action (file write or command) and apply it.
    Act {
        /// Skip confirmation prompts.
        #[arg(short, long)]
        yes: bool,
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// Interactive session.
    Repl,
}

#[derive(Subcommand)]
enum TodoCommand {
    Add {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    List {
        /// Include completed todos.
        #[arg(short, long)]
        all: bool,
    },
    /// Print the number of pending todos.
    Pending,
    /// Change the title and/or description of a todo.
    Update {
        id: u64,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    Done {
        id: u64,
    },
    Delete {
        id: u64,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Print the active policy as JSON.
    Show,
    /// Validate the policy file; fails if it is missing or invalid.
    Validate,
    /// Check whether `tool` may perform `operation` on `path`.
    CheckPath {
        tool: String,
        operation: String,
        path: String,
    },
    /// Check whether a shell command is allowed.
    CheckCommand {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Reads the answer to a confirmation question from stdin.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn ask(&self, question: &str) -> Result<Answer> {
        let mut stderr = io::stderr();
        write!(stderr, "{question}\nProceed? [y]es / [n]o / [a]lways: ")
            .and_then(|()| stderr.flush())
            .context("write confirmation prompt")?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read confirmation answer")?;
        Ok(parse_answer(&line))
    }
}

fn main() {
    mag::logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Todo(command) => cmd_todo(root, command),
        Command::Policy(command) => cmd_policy(root, command),
        Command::Do { target } => cmd_do(root, &target.join(" ")),
        Command::Status => {
            println!("{}", LocalSession::open_local(root)?.status());
            Ok(exit_codes::OK)
        }
        Command::Chat { prompt } => cmd_chat(root, &prompt.join(" ")),
        Command::Act { yes, prompt } => cmd_act(root, &prompt.join(" "), yes),
        Command::Repl => {
            let session = LocalSession::open_local(root)?;
            mag::repl::run(&session, io::stdin().lock(), &mut io::stdout())?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let config = if force || !paths.config_path.exists() {
        let config = AppConfig::default();
        write_config(&paths.config_path, &config)?;
        config
    } else {
        load_config(&paths.config_path)?
    };
    let policy_path = paths.resolve(&config.policy_path);
    if force {
        write_policy(&policy_path, &PolicySettings::default())?;
    } else {
        load_or_create_policy(&policy_path)?;
    }
    println!("Initialized {}", paths.state_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_todo(root: &Path, command: TodoCommand) -> Result<i32> {
    let session = LocalSession::open_local(root)?;
    match command {
        TodoCommand::Add { title, description } => {
            let id = session.add_todo(&title, &description)?;
            println!("Added todo {id}: {title}");
        }
        TodoCommand::List { all } => {
            let tasks = session.list_todos(all)?;
            let refs: Vec<_> = tasks.iter().collect();
            println!("{}", render_todo_list(&refs).trim());
        }
        TodoCommand::Pending => println!("{}", session.status().pending),
        TodoCommand::Update {
            id,
            title,
            description,
        } => {
            let update = TaskUpdate {
                title,
                description,
                status: None,
            };
            if session.update_todo(id, update)? {
                println!("Updated todo {id}");
            } else {
                println!("Todo {id} unchanged");
            }
        }
        TodoCommand::Done { id } => {
            session.complete_todo(id)?;
            println!("Completed todo {id}");
        }
        TodoCommand::Delete { id } => {
            session.delete_todo(id)?;
            println!("Deleted todo {id}");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_policy(root: &Path, command: PolicyCommand) -> Result<i32> {
    if let PolicyCommand::Validate = command {
        let paths = ProjectPaths::new(root);
        let config = load_config(&paths.config_path)?;
        let policy_path = paths.resolve(&config.policy_path);
        load_policy(&policy_path)?;
        println!("Policy OK: {}", policy_path.display());
        return Ok(exit_codes::OK);
    }

    let session = LocalSession::open_local(root)?;
    let policy = session.policy();
    match command {
        PolicyCommand::Show => {
            let json = serde_json::to_string_pretty(&*policy.settings())
                .context("serialize policy")?;
            println!("{json}");
        }
        PolicyCommand::CheckPath {
            tool,
            operation,
            path,
        } => {
            let op = parse_operation(&operation)?;
            policy.check_path(&tool, op, &path)?;
            println!("Allowed: {tool}.{op} on '{path}'");
        }
        PolicyCommand::CheckCommand { command } => {
            let command = command.join(" ");
            policy.check_command(&command)?;
            println!("Allowed: {command}");
        }
        PolicyCommand::Validate => {}
    }
    Ok(exit_codes::OK)
}

fn parse_operation(raw: &str) -> Result<Operation> {
    Operation::ALL
        .into_iter()
        .find(|op| op.as_str().eq_ignore_ascii_case(raw))
        .ok_or_else(|| {
            ValidationError::single(format!(
                "Unknown operation '{raw}' (expected create, read, update or delete)"
            ))
            .into()
        })
}

fn print_event(event: &TaskEvent<'_>, _store: &TodoStore) {
    match event {
        TaskEvent::Started(task) => eprintln!("Executing: {} (ID: {})", task.title, task.id),
        TaskEvent::Completed(task, outcome) => {
            eprintln!("Completed: {} - {}", task.title, outcome.summary);
        }
        TaskEvent::Failed(task, err) => eprintln!("Failed: {} - {err:#}", task.title),
    }
}

fn cmd_do(root: &Path, target: &str) -> Result<i32> {
    let command = parse_control_command(&format!("/do {target}"))
        .context("parse do target")??;
    let ControlCommand::Do(target) = command else {
        return Err(ValidationError::single("expected a /do target").into());
    };
    let session = LocalSession::open_local(root)?;
    let report = session.execute(target, &mut print_event)?;
    println!("{}", report.message);
    Ok(if report.failed > 0 {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

fn cmd_chat(root: &Path, prompt: &str) -> Result<i32> {
    let session = LocalSession::open_local(root)?;
    let outcome = session.chat(prompt, &mut print_event)?;
    println!("{}", outcome.text);
    for line in &outcome.log {
        eprintln!("{line}");
    }
    if let Some(suggestion) = &outcome.suggestion {
        eprintln!("{suggestion}");
    }
    Ok(exit_codes::OK)
}

fn cmd_act(root: &Path, prompt: &str, yes: bool) -> Result<i32> {
    let session = LocalSession::open_local(root)?;
    let report = if yes {
        session.run_action(prompt, &AutoApprove)?
    } else {
        session.run_action(prompt, &StdinConfirm)?
    };
    println!("{report}");
    Ok(if report.succeeded() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}
