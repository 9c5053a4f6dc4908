use clap::{Arg, Command};
use log::LevelFilter;
use std::collections::HashSet;
use std::process;
use std::sync::Mutex;

use swapmod::checker::{ModActions, PostChecker, Submission};
use swapmod::config::Config;
use swapmod::repost::UserStateStore;

/// Dry-run collaborator: logs every requested moderation action instead of
/// performing it. Removals are remembered so the grace-period exemption
/// behaves like it would against the real forum.
struct DryRunActions {
    moderators: HashSet<String>,
    removed: Mutex<HashSet<String>>,
}

impl DryRunActions {
    fn new(moderators: HashSet<String>) -> Self {
        DryRunActions {
            moderators,
            removed: Mutex::new(HashSet::new()),
        }
    }
}

impl ModActions for DryRunActions {
    fn get_moderators(&self) -> anyhow::Result<HashSet<String>> {
        Ok(self.moderators.clone())
    }

    fn is_removed(&self, submission_id: &str) -> anyhow::Result<bool> {
        Ok(self.removed.lock().unwrap().contains(submission_id))
    }

    fn apply_flair(&self, post: &Submission, text: &str, class: &str) -> anyhow::Result<()> {
        println!("  would flair {} as '{}' ({})", post.id, text, class);
        Ok(())
    }

    fn remove(&self, post: &Submission) -> anyhow::Result<()> {
        println!("  would remove {}", post.id);
        self.removed.lock().unwrap().insert(post.id.clone());
        Ok(())
    }

    fn reply(&self, post: &Submission, text: &str) -> anyhow::Result<String> {
        println!("  would reply to {}: {}", post.id, text.lines().next().unwrap_or(""));
        Ok(format!("dryrun-reply-{}", post.id))
    }

    fn report(&self, target_id: &str, reason: &str) -> anyhow::Result<()> {
        println!("  would report {target_id}: {reason}");
        Ok(())
    }

    fn distinguish(&self, _reply_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

fn main() {
    let matches = Command::new("swapmod")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Forum submission classifier and repost moderator")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/swapmod.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-file")
                .long("check-file")
                .value_name("FILE")
                .help("Classify submissions from a JSON-lines file without performing actions")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("moderator")
                .long("moderator")
                .value_name("NAME")
                .help("Treat NAME as a moderator during --check-file (repeatable)")
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("Configuration is valid");
        println!("  personal rules: {}", config.personal.rules.len());
        for rule in &config.personal.rules {
            println!("    {} (class: {})", rule.name, rule.class);
        }
        println!("  informational rules: {}", config.informational.rules.len());
        for rule in &config.informational.rules {
            println!(
                "    {} (tag: {})",
                rule.name,
                rule.tag.as_deref().unwrap_or("")
            );
        }
        println!("  location primaries: {}", config.locations.len());
        return;
    }

    if let Some(check_file) = matches.get_one::<String>("check-file") {
        let moderators: HashSet<String> = matches
            .get_many::<String>("moderator")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        if let Err(e) = check_submission_file(config, check_file, moderators) {
            eprintln!("Error checking submissions: {e}");
            process::exit(1);
        }
        return;
    }

    eprintln!("Nothing to do. Use --test-config, --generate-config or --check-file.");
    process::exit(2);
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_yaml() {
        Ok(yaml) => {
            if let Err(e) = std::fs::write(path, yaml) {
                eprintln!("Error writing configuration file: {e}");
                process::exit(1);
            }
            println!("Default configuration written to: {path}");
        }
        Err(e) => {
            eprintln!("Error serializing configuration: {e}");
            process::exit(1);
        }
    }
}

/// Run a file of submissions (one JSON object per line) through the full
/// checker against an in-memory state store and a dry-run collaborator.
fn check_submission_file(
    config: Config,
    path: &str,
    moderators: HashSet<String>,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)?;
    let store = UserStateStore::open_in_memory()?;
    let actions = DryRunActions::new(moderators);
    let mut checker = PostChecker::new(config, store, actions)?;

    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let submission: Submission = serde_json::from_str(line)
            .map_err(|e| anyhow::anyhow!("Line {}: invalid submission: {}", lineno + 1, e))?;

        println!(
            "{} by {}: {}",
            submission.id, submission.author, submission.title
        );
        let verdict = checker.process(&submission)?;
        match (&verdict.category, verdict.violations.first()) {
            (Some(category), _) if verdict.is_repost => {
                println!("  verdict: repost ({category})");
            }
            (Some(category), _) if verdict.repost_exempt => {
                println!("  verdict: accepted ({category}, grace-exempt repost)");
            }
            (Some(category), _) => println!("  verdict: accepted ({category})"),
            (None, Some(reason)) => println!("  verdict: rejected ({reason})"),
            (None, None) => println!("  verdict: skipped"),
        }
    }

    Ok(())
}
