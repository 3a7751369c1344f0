//! Rallf CLI
//!
//! Usage:
//!   rallf login [--username <username>] [--password <password>]
//!   rallf incubator (start | stop) [--endpoint <docker_endpoint>] [--persistent] [--dev]
//!   rallf robot ls
//!   rallf robot create
//!   rallf robot delete --robot <robot>
//!   rallf robot skill ls --robot <robot>
//!   rallf robot skill learn <docker_image> --robot <robot>
//!   rallf robot skill forget <task> --robot <robot>
//!   rallf --help
//!   rallf --version

use rallf_incubator::client::{ClientError, IncubatorControl, RpcClient, StartOptions, DEFAULT_URL};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const USAGE: &str = "Rallf CLI

Usage:
  rallf login [--username <username>] [--password <password>]
  rallf incubator (start | stop) [--endpoint <docker_endpoint>] [--persistent] [--dev]
  rallf robot ls
  rallf robot create
  rallf robot delete --robot <robot>
  rallf robot skill ls --robot <robot>
  rallf robot skill learn <docker_image> --robot <robot>
  rallf robot skill forget <task> --robot <robot>
  rallf --help
  rallf --version

Options:
  -e, --endpoint <docker_endpoint>   Docker endpoint to use [default: unix:///var/run/docker.sock]
  -u, --username <username>          rallf.com username
  -p, --password <password>          rallf.com password, use \"-\" to get it from stdin
  -r, --robot <robot>                Robot to use
  --persistent                       Keep the incubator running across restarts
  -d, --dev                          Run incubator in developer mode
  -h, --help                         Show this screen.
  -v, --version                      Show version.

Environment:
  RALLF_URL                          Control plane URL [default: http://localhost:4000]";

/// Parsed command line
struct Args {
    words: Vec<String>,
    endpoint: Option<String>,
    username: Option<String>,
    password: Option<String>,
    robot: Option<String>,
    persistent: bool,
    dev: bool,
}

impl Args {
    fn parse(raw: &[String]) -> Result<Self, String> {
        let mut args = Args {
            words: Vec::new(),
            endpoint: None,
            username: None,
            password: None,
            robot: None,
            persistent: false,
            dev: false,
        };

        let mut iter = raw.iter();
        while let Some(arg) = iter.next() {
            let mut value = |name: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| format!("{} requires a value", name))
            };
            match arg.as_str() {
                "-e" | "--endpoint" => args.endpoint = Some(value(arg)?),
                "-u" | "--username" => args.username = Some(value(arg)?),
                "-p" | "--password" => args.password = Some(value(arg)?),
                "-r" | "--robot" => args.robot = Some(value(arg)?),
                "--persistent" => args.persistent = true,
                "-d" | "--dev" => args.dev = true,
                flag if flag.starts_with('-') => return Err(format!("unknown option {}", flag)),
                word => args.words.push(word.to_string()),
            }
        }
        Ok(args)
    }

    fn robot(&self) -> Result<String, String> {
        self.robot.clone().ok_or_else(|| "--robot is required".to_string())
    }

    fn word(&self, idx: usize, what: &str) -> Result<String, String> {
        self.words
            .get(idx)
            .cloned()
            .ok_or_else(|| format!("missing <{}>", what))
    }
}

#[tokio::main]
async fn main() {
    let raw: Vec<String> = std::env::args().skip(1).collect();

    if raw.is_empty() || raw.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return;
    }
    if raw.iter().any(|a| a == "--version" || a == "-v") {
        println!("Rallf CLI {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if std::env::var("RUST_LOG").is_ok() {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_writer(std::io::stderr)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    let args = match Args::parse(&raw) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let url = std::env::var("RALLF_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let cli = Cli {
        rpc: RpcClient::new(url),
        control: IncubatorControl::new(args.endpoint.clone()),
    };

    if let Err(code) = cli.run(&args).await {
        std::process::exit(code);
    }
}

struct Cli {
    rpc: RpcClient,
    control: IncubatorControl,
}

enum Outcome {
    Done,
    Value(Value),
}

impl Cli {
    async fn run(&self, args: &Args) -> Result<(), i32> {
        let words: Vec<&str> = args.words.iter().map(String::as_str).collect();

        let (label, outcome) = match words.as_slice() {
            ["login", ..] => ("Signing-in rallf.com", self.login(args).await),
            ["incubator", "start", ..] => ("Starting incubator", self.start_incubator(args).await),
            ["incubator", "stop", ..] => ("Stopping incubator", self.stop_incubator().await),
            ["robot", "ls", ..] => ("Listing robots", self.call("list_robots", json!([])).await),
            ["robot", "create", ..] => ("Creating robot", self.call("create_robot", json!([])).await),
            ["robot", "delete", ..] => ("Deleting robot", self.robot_call("delete_robot", args, None).await),
            ["robot", "skill", "ls", ..] => {
                ("Listing robot skills", self.robot_call("list_skills", args, None).await)
            }
            ["robot", "skill", "learn", ..] => (
                "Learning robot skill",
                self.robot_call("learn_skill", args, Some((3, "docker_image"))).await,
            ),
            ["robot", "skill", "forget", ..] => (
                "Forgetting robot skill",
                self.robot_call("forget_skill", args, Some((3, "task"))).await,
            ),
            _ => {
                eprintln!("{}", USAGE);
                return Err(2);
            }
        };

        print!("{}... ", label);
        let _ = std::io::stdout().flush();

        match outcome {
            Ok(Outcome::Done) => {
                println!("[OK]");
                Ok(())
            }
            Ok(Outcome::Value(value)) => {
                println!("[OK]");
                print_value(&value);
                Ok(())
            }
            Err(e) => {
                println!("[ERROR] {}", e);
                Err(1)
            }
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Outcome, String> {
        self.control.require_running().await.map_err(|e| e.to_string())?;
        let value = self.rpc.call(method, params).await.map_err(|e| e.to_string())?;
        Ok(if value.is_null() {
            Outcome::Done
        } else {
            Outcome::Value(value)
        })
    }

    async fn robot_call(
        &self,
        method: &str,
        args: &Args,
        extra: Option<(usize, &str)>,
    ) -> Result<Outcome, String> {
        let mut params = vec![Value::String(args.robot()?)];
        if let Some((idx, what)) = extra {
            params.push(Value::String(args.word(idx, what)?));
        }
        self.call(method, Value::Array(params)).await
    }

    async fn login(&self, args: &Args) -> Result<Outcome, String> {
        let username = match args.username.clone() {
            Some(u) => u,
            None => prompt("\nRALLF Username: ")?,
        };
        let password = match args.password.as_deref() {
            Some("-") => read_stdin()?,
            Some(p) => p.to_string(),
            None => prompt("RALLF Password: ")?,
        };
        self.call(
            "login",
            json!([{ "username": username, "password": password }]),
        )
        .await
    }

    async fn start_incubator(&self, args: &Args) -> Result<Outcome, String> {
        let dev_source = if args.dev {
            Some(std::env::current_dir().map_err(|e| e.to_string())?)
        } else {
            None
        };
        let options = StartOptions {
            persistent: args.persistent,
            dev_source,
        };
        self.control
            .start(&options)
            .await
            .map(|_| Outcome::Done)
            .map_err(|e: ClientError| e.to_string())
    }

    async fn stop_incubator(&self) -> Result<Outcome, String> {
        self.control
            .stop()
            .await
            .map(|_| Outcome::Done)
            .map_err(|e| e.to_string())
    }
}

fn print_value(value: &Value) {
    match value {
        Value::String(s) => println!("{}", s),
        Value::Array(items) => {
            for item in items {
                print_value(item);
            }
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{}: {}", k, s),
                    Value::Array(items) => format!("{}: [{} items]", k, items.len()),
                    other => format!("{}: {}", k, other),
                })
                .collect();
            println!("{}", parts.join(", "));
        }
        other => println!("{}", other),
    }
}

fn prompt(label: &str) -> Result<String, String> {
    print!("{}", label);
    std::io::stdout().flush().map_err(|e| e.to_string())?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| e.to_string())?;
    Ok(line.trim().to_string())
}

fn read_stdin() -> Result<String, String> {
    let mut buf = String::new();
    for line in std::io::stdin().lock().lines() {
        buf.push_str(&line.map_err(|e| e.to_string())?);
        buf.push('\n');
    }
    Ok(buf.trim().to_string())
}
