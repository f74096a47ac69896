mod archive;
mod config;
mod engine;
mod error;
mod platform;
mod registry;
mod secrets;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use colored::Colorize;
use std::io::{self, Write};

use crate::engine::{Engine, SwitchOutcome};

#[derive(Parser)]
#[command(
    name = "ccrotate",
    version,
    about = "Rotate between multiple Claude Code accounts",
    long_about = "\
Manage several Claude Code logins and rotate between them without \
logging in and out each time.\n\
\n\
Account state lives in ~/.ccrotate-backup with credentials kept in \
the system keychain (macOS) or owner-only files (Linux/WSL)."
)]
struct Cli {
    /// Back up the currently logged-in account and start managing it
    #[arg(long, group = "cmd")]
    add_account: bool,

    /// Remove a managed account by number or email (asks for confirmation)
    #[arg(long, value_name = "NUMBER|EMAIL", group = "cmd")]
    remove_account: Option<String>,

    /// List managed accounts and mark the active one
    #[arg(long, group = "cmd")]
    list: bool,

    /// Rotate to the next account in the sequence
    #[arg(long, group = "cmd")]
    switch: bool,

    /// Switch to a specific account by number or email
    #[arg(long, value_name = "NUMBER|EMAIL", group = "cmd")]
    switch_to: Option<String>,

    /// Show the currently active account
    #[arg(long, group = "cmd")]
    status: bool,

    /// Generate shell completions
    #[arg(long, value_name = "SHELL", group = "cmd")]
    completions: Option<Shell>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("\n  {} {}\n", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if platform::is_root() && !platform::is_container() {
        bail!("Do not run as root (unless inside a container)");
    }

    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "ccrotate", &mut io::stdout());
        return Ok(());
    }

    let home = dirs::home_dir().context("Cannot find home directory")?;
    let engine = Engine::for_platform(&home, platform::detect());

    if cli.add_account {
        add(&engine)
    } else if let Some(id) = cli.remove_account.as_deref() {
        remove(&engine, id)
    } else if cli.list {
        print_list(&engine)
    } else if cli.switch {
        switch_next(&engine)
    } else if let Some(id) = cli.switch_to.as_deref() {
        switch_to(&engine, id)
    } else if cli.status {
        status(&engine)
    } else {
        Cli::command().print_help()?;
        Ok(())
    }
}

// ── Add current account ───────────────────────────────────────────────────────

fn add(engine: &Engine) -> Result<()> {
    let added = engine.add_account()?;
    println!(
        "\n  {} Added {} as Account {}",
        "✓".green().bold(),
        added.email.bold(),
        added.number
    );
    print_list(engine)
}

// ── Remove account ────────────────────────────────────────────────────────────

fn remove(engine: &Engine, identifier: &str) -> Result<()> {
    let doc = engine.registry.load()?;
    if doc.accounts.is_empty() {
        bail!("No accounts are managed yet. Run `ccrotate --add-account` first.");
    }

    let (number, account) = engine.resolve(identifier)?;

    if doc.active_account_number == Some(number) {
        println!(
            "\n  {} Account {} ({}) is currently active.",
            "!".yellow().bold(),
            number,
            account.email
        );
    }

    print!(
        "\n  Remove {} ({})? [y/N] ",
        format!("Account {number}").bold(),
        account.email
    );
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    if !matches!(input.trim(), "y" | "Y") {
        println!("  Cancelled.");
        return Ok(());
    }

    let removed = engine.remove_account(number)?;
    println!(
        "\n  {} Removed Account {} ({})",
        "✓".green().bold(),
        number,
        removed.email
    );
    print_list(engine)
}

// ── List accounts ─────────────────────────────────────────────────────────────

fn print_list(engine: &Engine) -> Result<()> {
    let doc = engine.registry.load()?;

    if doc.accounts.is_empty() {
        println!("\n  {}\n", "No accounts managed yet.".dimmed());
        println!(
            "  Run {} to back up the current login.\n",
            "ccrotate --add-account".cyan().bold()
        );
        return Ok(());
    }

    let current_email = engine.live.config.current_email();
    let active = current_email
        .as_deref()
        .and_then(|e| doc.find_by_email(e))
        .or(doc.active_account_number);

    println!("\n  {}", "Managed Accounts".bold());
    println!("  {}", "─".repeat(40).dimmed());

    for &num in &doc.sequence {
        let Some(account) = doc.account(num) else {
            continue;
        };

        if active == Some(num) {
            println!(
                "  {}  {}  {}",
                format!("▶ {num:>2}").green().bold(),
                account.email.green().bold(),
                "(active)".green().dimmed()
            );
        } else {
            println!("  {}  {}", format!("  {num:>2}").dimmed(), account.email);
        }
    }

    println!("  {}\n", "─".repeat(40).dimmed());
    Ok(())
}

// ── Status ────────────────────────────────────────────────────────────────────

fn status(engine: &Engine) -> Result<()> {
    let doc = engine.registry.load()?;

    match engine.live.config.current_email() {
        None => {
            println!("\n  {} Not logged in to Claude Code.\n", "✗".red().bold());
        }
        Some(email) => match doc.find_by_email(&email) {
            Some(num) => println!(
                "\n  {} {} {}\n",
                "▶".green().bold(),
                email.bold(),
                format!("(Account {num})").dimmed()
            ),
            None => println!(
                "\n  {} {} {}\n",
                "▶".yellow().bold(),
                email.bold(),
                "(not managed — run `ccrotate --add-account`)".dimmed()
            ),
        },
    }
    Ok(())
}

// ── Switch ────────────────────────────────────────────────────────────────────

fn switch_next(engine: &Engine) -> Result<()> {
    let doc = engine.registry.load()?;
    if doc.accounts.is_empty() {
        bail!("No accounts managed yet. Run `ccrotate --add-account` first.");
    }

    warn_if_claude_running();
    report_switch(engine, engine.switch_next()?)
}

fn switch_to(engine: &Engine, identifier: &str) -> Result<()> {
    let doc = engine.registry.load()?;
    if doc.accounts.is_empty() {
        bail!("No accounts managed yet. Run `ccrotate --add-account` first.");
    }

    let (number, _) = engine.resolve(identifier)?;
    warn_if_claude_running();
    report_switch(engine, engine.switch_to(number)?)
}

fn report_switch(engine: &Engine, outcome: SwitchOutcome) -> Result<()> {
    match outcome {
        SwitchOutcome::Switched {
            from_email,
            to_email,
            to_number,
        } => {
            println!(
                "\n  {} {}  {}  {} {}",
                "→".cyan().bold(),
                from_email.dimmed(),
                "→".dimmed(),
                to_email.cyan().bold(),
                format!("(Account {to_number})").dimmed()
            );
            print_list(engine)?;
            println!("  {} Restart Claude Code to apply.\n", "→".cyan().bold());
        }
        SwitchOutcome::AddedCurrent { number, email } => {
            println!(
                "\n  {} Active account {} was not managed — added it as Account {}.",
                "·".yellow(),
                email.bold(),
                number
            );
            println!(
                "\n  Run {} again to rotate to the next account.\n",
                "ccrotate --switch".cyan().bold()
            );
        }
        SwitchOutcome::AlreadyActive { number, email } => {
            println!(
                "\n  {} Already using {} (Account {}). Add another account to rotate.\n",
                "·".cyan(),
                email.bold(),
                number
            );
        }
    }
    Ok(())
}

fn warn_if_claude_running() {
    if platform::claude_running() {
        println!(
            "\n  {} Claude Code appears to be running — quit it before switching.",
            "!".yellow().bold()
        );
    }
}
