mod agent_adapter;
mod commands;

use clap::{Parser, Subcommand};

/// taskmaster CLI -- drive an AI coding agent through plan, work, CI, and
/// review-fix stages until a goal is verifiably done.
#[derive(Parser)]
#[command(name = "tm", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run for a goal.
    Start {
        /// The goal to accomplish.
        goal: String,
        /// Default model tier (smart, fast, balanced, long_context).
        #[arg(long)]
        model: Option<String>,
        /// Leave PRs open instead of merging them when green.
        #[arg(long)]
        no_auto_merge: bool,
        /// Session budget for the whole run.
        #[arg(long, default_value_t = 50)]
        max_sessions: u64,
        /// Pause the run as soon as a PR is opened.
        #[arg(long)]
        pause_on_pr: bool,
    },

    /// Resume a paused or blocked run.
    Resume {
        /// Optional change request queued into the mailbox before resuming.
        message: Option<String>,
        /// Resume even from the blocked state.
        #[arg(long)]
        force: bool,
    },

    /// Fix CI failures and review comments on a PR until it is mergeable.
    FixPr {
        /// PR number, `#n`, or a GitHub PR URL. Defaults to the PR for the
        /// current branch.
        pr: Option<String>,
        /// Cap on fix iterations.
        #[arg(long, default_value_t = 5)]
        max_iterations: u32,
        /// Leave the PR open once green.
        #[arg(long)]
        no_merge: bool,
    },

    /// Delete the run's state directory.
    Clean {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        force: bool,
    },

    /// Queue or inspect out-of-band change requests.
    Mailbox {
        #[command(subcommand)]
        action: MailboxAction,
    },

    /// Show the current run's status.
    Status,

    /// Show unresolved review comments for a PR.
    Comments {
        /// PR number, `#n`, or a GitHub PR URL. Defaults to the run's
        /// current PR, then to the PR for the current branch.
        pr: Option<String>,
    },
}

#[derive(Subcommand)]
enum MailboxAction {
    /// Queue a change request for the running loop.
    Send {
        content: String,
        #[arg(long, default_value = "anonymous")]
        sender: String,
        /// 0 = low, 1 = normal, 2 = high, 3 = urgent.
        #[arg(long, default_value_t = 1)]
        priority: i64,
    },
    /// List pending messages without consuming them.
    List,
    /// Drop all pending messages.
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tm_telemetry::init_logging("tm", "info");

    let result = match cli.command {
        Commands::Start {
            goal,
            model,
            no_auto_merge,
            max_sessions,
            pause_on_pr,
        } => commands::start::run(goal, model, no_auto_merge, max_sessions, pause_on_pr).await,
        Commands::Resume { message, force } => commands::resume::run(message, force).await,
        Commands::FixPr {
            pr,
            max_iterations,
            no_merge,
        } => commands::fix_pr::run(pr, max_iterations, no_merge).await,
        Commands::Clean { force } => commands::clean::run(force),
        Commands::Mailbox { action } => match action {
            MailboxAction::Send {
                content,
                sender,
                priority,
            } => commands::mailbox::send(content, sender, priority),
            MailboxAction::List => commands::mailbox::list(),
            MailboxAction::Clear => commands::mailbox::clear(),
        },
        Commands::Status => commands::status::run(),
        Commands::Comments { pr } => commands::comments::run(pr).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
