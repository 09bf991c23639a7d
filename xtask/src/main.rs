//! Build automation tasks for the skymeal-pool workspace.
//!
//! Run with `cargo xtask <command>`. Every command is a list of cargo
//! invocations; `ci` runs the checks a change must pass before merging.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for skymeal-pool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, lint, unit and behaviour tests, pool invariants
    Ci,
    /// Check formatting
    Fmt,
    /// Lint every target with warnings denied
    Clippy,
    /// Run all workspace tests
    Test,
    /// Run the pool behaviour tests one at a time with pool logs shown
    PoolTests(PoolTestArgs),
    /// Run the property tests over acquire/release sequences
    Invariants(InvariantArgs),
    /// Build the pool API docs
    Doc,
    /// Run the acquire/release benchmarks
    Bench,
    /// Remove build artifacts
    Clean,
}

#[derive(Args)]
struct PoolTestArgs {
    /// Only run tests whose name contains this string
    filter: Option<String>,
}

#[derive(Args)]
struct InvariantArgs {
    /// Number of generated sequences per property
    #[arg(long, default_value_t = 256)]
    cases: u32,
}

/// One cargo invocation, plus the environment it runs with.
struct Step {
    label: &'static str,
    args: Vec<String>,
    env: Vec<(&'static str, String)>,
}

impl Step {
    fn cargo(label: &'static str, args: &[&str]) -> Self {
        Self {
            label,
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
            env: Vec::new(),
        }
    }

    fn env(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.env.push((key, value.into()));
        self
    }

    fn run(&self, sh: &Shell) -> Result<()> {
        println!("==> {}", self.label);
        let _guards: Vec<_> = self
            .env
            .iter()
            .map(|(key, value)| sh.push_env(key, value))
            .collect();
        let args = &self.args;
        cmd!(sh, "cargo {args...}")
            .run()
            .with_context(|| format!("{} failed", self.label))
    }
}

fn fmt() -> Step {
    Step::cargo("formatting", &["fmt", "--all", "--", "--check"])
}

fn clippy() -> Step {
    Step::cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn test() -> Step {
    Step::cargo("workspace tests", &["test", "--workspace"])
}

fn pool_tests(args: &PoolTestArgs) -> Step {
    let mut step = Step::cargo(
        "pool behaviour tests",
        &["test", "-p", "skymeal-testing", "--test", "pool", "--"],
    );
    if let Some(filter) = &args.filter {
        step.args.push(filter.clone());
    }
    step.args
        .extend(["--nocapture", "--test-threads=1"].map(String::from));
    step
}

fn invariants(args: &InvariantArgs) -> Result<Step> {
    if args.cases == 0 {
        bail!("--cases must be at least 1");
    }
    Ok(Step::cargo(
        "pool invariants",
        &["test", "-p", "skymeal-testing", "--test", "invariants"],
    )
    .env("PROPTEST_CASES", args.cases.to_string()))
}

fn plan(command: &Command) -> Result<Vec<Step>> {
    let steps = match command {
        Command::Ci => vec![
            fmt(),
            clippy(),
            test(),
            invariants(&InvariantArgs { cases: 1024 })?,
        ],
        Command::Fmt => vec![fmt()],
        Command::Clippy => vec![clippy()],
        Command::Test => vec![test()],
        Command::PoolTests(args) => vec![pool_tests(args)],
        Command::Invariants(args) => vec![invariants(args)?],
        Command::Doc => vec![Step::cargo(
            "pool docs",
            &["doc", "-p", "skymeal-pool", "--no-deps"],
        )],
        Command::Bench => vec![Step::cargo(
            "acquire/release benchmarks",
            &["bench", "-p", "skymeal-pool", "--bench", "pool"],
        )],
        Command::Clean => vec![Step::cargo("clean", &["clean"])],
    };
    Ok(steps)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    let steps = plan(&cli.command)?;
    for step in &steps {
        step.run(&sh)?;
    }
    if steps.len() > 1 {
        println!("{} steps passed", steps.len());
    }
    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;

    Ok(PathBuf::from(manifest.trim())
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}
