use std::{
    env::current_dir,
    fmt::Debug,
    io::{stdout, Write},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use rev::{
    diff::Diff,
    merge::MergeResult,
    repository::{Repository, ResetMode},
    storage::directory::DirectoryStorage,
    Result,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "rev", about = "a small snapshot-based revision control system")]
struct Arguments {
    #[arg(long, global = true, help = "print results as JSON")]
    json: bool,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(about = "initialize a repository in the working directory")]
    Init,
    #[clap(about = "stage files or directories for the next commit")]
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    #[clap(name = "rm-cached", about = "drop paths from the staging area")]
    RmCached {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    #[clap(about = "record the staged changes")]
    Commit {
        #[arg(short, long, help = "message to leave with this commit")]
        message: String,
    },
    #[clap(about = "show staged and unstaged changes")]
    Status,
    #[clap(about = "show the history of the current branch")]
    Log,
    #[clap(about = "list branches, create one, or delete one")]
    Branch {
        #[arg(help = "name of the branch to create at HEAD")]
        name: Option<String>,
        #[arg(short, long, help = "branch to delete", conflicts_with = "name")]
        delete: Option<String>,
    },
    #[clap(about = "point HEAD at another branch")]
    Switch { name: String },
    #[clap(about = "compare the working tree, or two commits")]
    Diff {
        #[arg(default_value = "HEAD")]
        rev: String,
        #[arg(long, help = "compare `rev` with this commit instead of the working tree")]
        against: Option<String>,
    },
    #[clap(about = "merge a branch into HEAD")]
    Merge { branch: String },
    #[clap(about = "move the current branch to another commit")]
    Reset {
        rev: String,
        #[arg(long, help = "also rewrite the working tree")]
        hard: bool,
    },
    #[clap(about = "set staged changes aside, or bring them back")]
    Stash {
        #[clap(subcommand)]
        action: Option<StashAction>,
    },
}

#[derive(Subcommand, Debug)]
enum StashAction {
    #[clap(about = "restore stashed changes into the staging area")]
    Pop,
}

fn print_json<A: Serialize>(thing: &A) -> Result<()> {
    let mut out = stdout().lock();
    serde_json::to_writer_pretty(&mut out, thing)?;
    writeln!(out)?;
    Ok(())
}

fn print_diff(diff: &Diff) {
    for change in diff.changes() {
        println!("{:>8}  {}", change.kind, change.path);
    }
}

fn open() -> Result<Repository<DirectoryStorage>> {
    Repository::discover(&current_dir()?)
}

fn run(args: Arguments) -> Result<()> {
    use Command::*;
    let json = args.json;
    match args.cmd {
        Init => {
            let dir = current_dir()?;
            Repository::init(&dir)?;
            if !json {
                println!("initialized empty repository in {}", dir.display());
            }
        }
        Add { paths } => {
            let staged = open()?.stage(&paths)?;
            if json {
                print_json(&staged)?;
            }
        }
        RmCached { paths } => {
            let count = open()?.unstage(&paths)?;
            if json {
                print_json(&count)?;
            }
        }
        Commit { message } => {
            let id = open()?.commit(&message)?;
            if json {
                print_json(&id)?;
            } else {
                println!("{}", id);
            }
        }
        Status => {
            let status = open()?.status()?;
            if json {
                return print_json(&status);
            }
            match (&status.branch, status.head) {
                (Some(branch), _) => println!("on branch {}", branch),
                (None, Some(head)) => println!("HEAD detached at {}", head),
                (None, None) => println!("HEAD detached"),
            }
            if let Some(merging) = status.merging {
                println!("merging {}; commit to conclude", merging);
            }
            for path in &status.conflicts {
                println!("unresolved: {}", path);
            }
            if !status.staged.is_clean() {
                println!("staged:");
                print_diff(&status.staged);
            }
            if !status.unstaged.is_clean() {
                println!("not staged:");
                print_diff(&status.unstaged);
            }
        }
        Log => {
            let history = open()?.history()?;
            if json {
                return print_json(&history);
            }
            for commit in history {
                println!("{} {}", commit.id, commit.message);
            }
        }
        Branch { name, delete } => {
            let mut repo = open()?;
            if let Some(name) = delete {
                repo.delete_branch(&name)?;
            } else if let Some(name) = name {
                repo.create_branch(&name)?;
            } else {
                let branches = repo.branches()?;
                if json {
                    return print_json(&branches);
                }
                for branch in branches {
                    let marker = if branch.current { '*' } else { ' ' };
                    println!("{} {}", marker, branch.name);
                }
            }
        }
        Switch { name } => open()?.switch_branch(&name)?,
        Diff { rev, against } => {
            let repo = open()?;
            let diff = match against {
                Some(against) => repo.diff_commits(&against, &rev)?,
                None => repo.diff(&rev)?,
            };
            if json {
                print_json(&diff)?;
            } else {
                print_diff(&diff);
            }
        }
        Merge { branch } => {
            let result = open()?.merge_branch(&branch)?;
            if json {
                print_json(&result)?;
            } else {
                match &result {
                    MergeResult::UpToDate => println!("already up to date"),
                    MergeResult::Merged { commit } => println!("merged {} as {}", branch, commit),
                    MergeResult::Conflicted { conflicts } => {
                        for path in conflicts {
                            println!("conflict: {}", path);
                        }
                    }
                }
            }
            result.into_result()?;
        }
        Reset { rev, hard } => {
            let mode = if hard { ResetMode::Hard } else { ResetMode::Soft };
            let id = open()?.reset(&rev, mode)?;
            if json {
                print_json(&id)?;
            } else {
                println!("HEAD is now at {}", id);
            }
        }
        Stash { action } => {
            let mut repo = open()?;
            let count = match action {
                None => repo.stash()?,
                Some(StashAction::Pop) => repo.stash_pop()?,
            };
            if json {
                print_json(&count)?;
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Arguments::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
