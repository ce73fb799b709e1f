use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use remark_client::{
    api::{CommentId, CommentRecord},
    build_forest, flatten_visible, CollapsedThreads, CommentStore,
};

#[derive(structopt::StructOpt)]
struct Opt {
    /// JSON dump of the comment records, defaults to the REMARK_DUMP environment variable
    #[structopt(short, long, parse(from_os_str))]
    dump: Option<PathBuf>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Print the comment forest in display order
    Render {
        /// Threads to show collapsed
        #[structopt(short, long)]
        collapse: Vec<String>,
    },

    /// Look for duplicate ids, dangling parents and parent cycles
    Check,
}

fn dump_path(opt: &Opt) -> anyhow::Result<PathBuf> {
    if let Some(p) = &opt.dump {
        return Ok(p.clone());
    }
    let p = std::env::var("REMARK_DUMP")
        .context("no --dump given and retrieving REMARK_DUMP environment variable")?;
    Ok(PathBuf::from(p))
}

fn load(path: &Path) -> anyhow::Result<Vec<CommentRecord>> {
    let data = std::fs::read(path).with_context(|| format!("reading dump {path:?}"))?;
    let records: Vec<CommentRecord> =
        serde_json::from_slice(&data).with_context(|| format!("parsing dump {path:?}"))?;
    for r in &records {
        r.validate()
            .with_context(|| format!("validating comment {}", r.id))?;
    }
    tracing::debug!(num = records.len(), "loaded dump");
    Ok(records)
}

fn render(records: &[CommentRecord], collapse: Vec<String>) -> anyhow::Result<Vec<String>> {
    let mut store = CommentStore::new();
    store
        .replace(records.iter().cloned())
        .context("loading dump into the store")?;
    let mut collapsed = CollapsedThreads::new();
    for id in collapse {
        let id = CommentId(id);
        if !store.contains(&id) {
            anyhow::bail!("cannot collapse unknown comment {id}");
        }
        collapsed.toggle(&id);
    }

    let forest = build_forest(store.records());
    let lines = flatten_visible(&forest, &collapsed)
        .into_iter()
        .map(|(depth, node)| {
            let r = &node.record;
            // only top-level threads fold, see flatten_visible
            let folded = collapsed.is_collapsed(node.id())
                && r.is_top_level()
                && node.has_children();
            let hidden = match folded {
                true => format!(" [+{} hidden]", node.subtree_len() - 1),
                false => String::new(),
            };
            format!(
                "{:indent$}{} ({}, {} likes): {}{}",
                "",
                r.author_id,
                r.created_at.format("%Y-%m-%d %H:%M"),
                r.like_count,
                r.text,
                hidden,
                indent = depth * 2,
            )
        })
        .collect();
    Ok(lines)
}

fn check(records: &[CommentRecord]) -> usize {
    let mut problems = 0;
    let mut parents = HashMap::new();
    for r in records {
        if parents.insert(&r.id, r.parent_id.as_ref()).is_some() {
            println!("duplicate id {}", r.id);
            problems += 1;
        }
    }
    for r in records {
        let Some(parent) = &r.parent_id else {
            continue;
        };
        if !parents.contains_key(parent) {
            println!("{} replies to missing comment {parent}", r.id);
            problems += 1;
            continue;
        }
        let mut cur = Some(parent);
        for _ in 0..parents.len() {
            match cur {
                Some(p) if p == &r.id => {
                    println!("{} is part of a parent cycle", r.id);
                    problems += 1;
                    break;
                }
                Some(p) => cur = parents.get(p).copied().flatten(),
                None => break,
            }
        }
    }
    problems
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let records = load(&dump_path(&opt)?)?;

    match opt.cmd {
        Command::Render { collapse } => {
            for line in render(&records, collapse)? {
                println!("{line}");
            }
        }
        Command::Check => {
            let problems = check(&records);
            if problems > 0 {
                anyhow::bail!("found {problems} problems in {} comments", records.len());
            }
            println!("{} comments, no problems found", records.len());
        }
    }

    Ok(())
}
