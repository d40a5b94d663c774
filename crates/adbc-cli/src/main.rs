use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process;

use adbc_core::engine::{self, ExpressionEngine};
use adbc_core::{
    verify, AdviceReceivers, BindingContext, Config, ContractKind, ContractSet, DeclKey, Enforcer,
    Error, Keywords, Model, Program, Severity, Value,
};

mod trace;

use trace::{Status, Trace};

/// Adbc: design-by-contract checking for advised programs
///
/// Resolve, verify and check contracts of a program description.
#[derive(Parser)]
#[command(name = "adbc", version, about, long_about = None)]
struct Cli {
    /// Log resolution and evaluation details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded calls and report contract violations
    Check {
        /// Path to the program description (.json)
        program: PathBuf,
        /// Path to the call trace (.json)
        #[arg(long)]
        trace: PathBuf,
        /// Path to an enforcement configuration (.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved contracts of a declaration
    Resolve {
        /// Path to the program description (.json)
        program: PathBuf,
        /// Declaration, e.g. `Account.deposit(double)`, `Account` or `@Audit.log`
        decl: String,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Lint a program description (placeholders, expressions, advice, samples)
    Verify {
        /// Path to the program description (.json)
        program: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a single expression
    Eval {
        expression: String,
        /// Variable bindings as a JSON object
        #[arg(long)]
        bindings: Option<String>,
        /// Expression engine name
        #[arg(long, default_value = "standard")]
        engine: String,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match cli.command {
        Commands::Check {
            program,
            trace,
            config,
            json,
        } => cmd_check(&program, &trace, config.as_deref(), json),
        Commands::Resolve {
            program,
            decl,
            config,
            json,
        } => cmd_resolve(&program, &decl, config.as_deref(), json),
        Commands::Verify {
            program,
            config,
            json,
        } => cmd_verify(&program, config.as_deref(), json),
        Commands::Eval {
            expression,
            bindings,
            engine,
        } => cmd_eval(&expression, bindings.as_deref(), &engine),
        Commands::Version => {
            println!(
                "adbc {} (adbc-core {})",
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_VERSION")
            );
            0
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("adbc_core=debug,adbc_cli=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── Helpers ───────────────────────────────────────────────

fn report_error(e: &Error) -> i32 {
    eprintln!("{} {}", "error:".red().bold(), e);
    2
}

fn load_config(path: Option<&Path>) -> Result<Config, Error> {
    let mut config = match path {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn load(program: &Path, config: Option<&Path>) -> Result<(Model, Enforcer), Error> {
    let config = load_config(config)?;
    let model = Program::load(program)?.build()?;
    let enforcer = model.enforcer(config)?;
    Ok((model, enforcer))
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
    }
}

// ── Commands ──────────────────────────────────────────────

fn cmd_check(program: &Path, trace_path: &Path, config: Option<&Path>, json: bool) -> i32 {
    let (model, enforcer) = match load(program, config) {
        Ok(loaded) => loaded,
        Err(e) => return report_error(&e),
    };
    let trace = match Trace::load(trace_path) {
        Ok(t) => t,
        Err(e) => return report_error(&e),
    };

    let outcomes = trace::replay(&model, &enforcer, &trace);
    let violations = outcomes.iter().filter(|o| o.status == Status::Violation).count();
    let errors = outcomes.iter().filter(|o| o.status == Status::Error).count();

    if json {
        print_json(&serde_json::json!({
            "calls": outcomes,
            "violations": violations,
            "errors": errors,
        }));
    } else {
        for o in &outcomes {
            match o.status {
                Status::Ok => println!("{} #{} {}", "✓".green(), o.call, o.decl),
                Status::Violation => {
                    println!("{} #{} {}", "✗".red(), o.call, o.decl);
                    if let Some(v) = &o.violation {
                        println!("{}", v.to_string().red());
                    }
                }
                Status::Error => {
                    println!("{} #{} {}", "!".yellow(), o.call, o.decl);
                    if let Some(e) = &o.error {
                        println!("\t{}", e.yellow());
                    }
                }
            }
        }
        println!(
            "{} calls, {} violations, {} errors",
            outcomes.len(),
            violations,
            errors
        );
    }

    if errors > 0 {
        2
    } else if violations > 0 {
        1
    } else {
        0
    }
}

fn cmd_resolve(program: &Path, decl: &str, config: Option<&Path>, json: bool) -> i32 {
    let (model, enforcer) = match load(program, config) {
        Ok(loaded) => loaded,
        Err(e) => return report_error(&e),
    };
    let key: DeclKey = match decl.parse() {
        Ok(k) => k,
        Err(e) => return report_error(&e),
    };

    let resolved = match resolve_all(&model, &enforcer, &key) {
        Ok(r) => r,
        Err(e) => return report_error(&e),
    };

    if json {
        let entries: Vec<_> = resolved
            .iter()
            .map(|(label, kind, set)| {
                serde_json::json!({
                    "context": label,
                    "kind": kind,
                    "contract": set.parts(),
                    "fingerprint": set.fingerprint(),
                })
            })
            .collect();
        print_json(&serde_json::json!({ "decl": key.to_string(), "contracts": entries }));
    } else {
        println!("{}", key.to_string().bold());
        for (label, kind, set) in &resolved {
            println!("  {} {}", kind.to_string().cyan(), label);
            for part in set.iter() {
                println!("    {}", part);
            }
        }
    }
    0
}

/// Resolved contracts of `key`. Advice is resolved at every join point
/// that lists it.
fn resolve_all(
    model: &Model,
    enforcer: &Enforcer,
    key: &DeclKey,
) -> Result<Vec<(String, ContractKind, ContractSet)>, Error> {
    let repository = enforcer.repository();
    let mut out = Vec::new();
    match key {
        DeclKey::Type { name } => {
            let set = repository.invariant(name)?;
            out.push((String::new(), ContractKind::Invariant, set));
        }
        DeclKey::Advice { .. } => {
            for (join_point, list) in model.join_points() {
                if !list.contains(key) {
                    continue;
                }
                let later = enforcer.advice_links(&join_point, key, &AdviceReceivers::default())?;
                for kind in [ContractKind::Precondition, ContractKind::Postcondition] {
                    let resolution = enforcer.resolve_advice(key, &join_point, &later, kind)?;
                    out.push((
                        format!("at {}", join_point),
                        kind,
                        resolution.contract,
                    ));
                }
            }
            if out.is_empty() {
                return Err(Error::UnknownDeclaration(format!("{} advises nothing", key)));
            }
        }
        _ => {
            for kind in [ContractKind::Precondition, ContractKind::Postcondition] {
                let set = repository.resolve(kind, key)?;
                out.push((String::new(), kind, set));
            }
        }
    }
    Ok(out)
}

fn cmd_verify(program: &Path, config: Option<&Path>, json: bool) -> i32 {
    let (model, enforcer) = match load(program, config) {
        Ok(loaded) => loaded,
        Err(e) => return report_error(&e),
    };
    let result = verify(&model, &enforcer);

    if json {
        let diagnostics: Vec<_> = result
            .diagnostics
            .iter()
            .map(|d| {
                serde_json::json!({
                    "severity": match d.severity {
                        Severity::Error => "error",
                        Severity::Warning => "warning",
                    },
                    "kind": d.kind.to_string(),
                    "decl": d.decl.as_ref().map(|k| k.to_string()),
                    "message": d.message,
                })
            })
            .collect();
        print_json(&serde_json::json!({
            "valid": result.is_valid(),
            "diagnostics": diagnostics,
        }));
    } else {
        for d in &result.diagnostics {
            match d.severity {
                Severity::Error => println!("{}", d.to_string().red()),
                Severity::Warning => println!("{}", d.to_string().yellow()),
            }
        }
        if result.is_valid() {
            println!(
                "{} {} verified ({} warnings)",
                "✓".green(),
                program.display(),
                result.warnings().len()
            );
        } else {
            println!(
                "{} {} has {} errors",
                "✗".red(),
                program.display(),
                result.errors().len()
            );
        }
    }

    if result.is_valid() {
        0
    } else {
        1
    }
}

fn cmd_eval(expression: &str, bindings: Option<&str>, engine_name: &str) -> i32 {
    let engine = match engine::by_name(engine_name) {
        Ok(e) => e,
        Err(e) => return report_error(&e),
    };
    let mut ctx = BindingContext::new(&Keywords::default());
    if let Some(text) = bindings {
        let json: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return report_error(&Error::from(e)),
        };
        let serde_json::Value::Object(vars) = json else {
            return report_error(&Error::Config("--bindings must be a JSON object".to_string()));
        };
        for (name, value) in &vars {
            ctx.bind(name.clone(), Value::from_json(value));
        }
    }
    match engine.evaluate(expression, &ctx) {
        Ok(value) => {
            println!("{}", value);
            0
        }
        Err(e) => report_error(&e),
    }
}
