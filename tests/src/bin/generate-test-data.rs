use chrono::{Duration, TimeZone, Utc};
use rand::{seq::SliceRandom, Rng};
use remark_api::{CommentId, CommentRecord, UserId};

const COMMENT_MIN_WORDS: usize = 3;
const COMMENT_MAX_WORDS: usize = 40;

/// Chance that a comment replies to an earlier one rather than starting a thread
const REPLY_RATIO: f64 = 0.6;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Number of comments to generate
    #[structopt(short, long, default_value = "200")]
    comments: usize,

    /// Number of distinct authors
    #[structopt(short, long, default_value = "5")]
    users: usize,

    /// Maximum like count of a comment
    #[structopt(long, default_value = "20")]
    max_likes: u64,
}

fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();
    anyhow::ensure!(opt.users > 0, "need at least one user");
    let mut rng = rand::thread_rng();

    let users = (0..opt.users)
        .map(|_| {
            let word = lipsum::lipsum_words_with_rng(&mut rng, 1);
            UserId::new(word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        })
        .collect::<Vec<_>>();
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("invalid start date"))?;

    let mut comments: Vec<CommentRecord> = Vec::with_capacity(opt.comments);
    let mut time = start;
    for i in 0..opt.comments {
        // replies always come after their parent, so the dump is causally ordered
        time = time + Duration::seconds(rng.gen_range(1..3600));
        let parent_id = match !comments.is_empty() && rng.gen_bool(REPLY_RATIO) {
            true => comments.choose(&mut rng).map(|c| c.id.clone()),
            false => None,
        };
        let words = rng.gen_range(COMMENT_MIN_WORDS..=COMMENT_MAX_WORDS);
        let mut text = lipsum::lipsum_words_with_rng(&mut rng, words);
        if let Some(parent) = parent_id
            .as_ref()
            .and_then(|p| comments.iter().find(|c| c.id == *p))
        {
            text = format!("@{} {}", parent.author_id.label(), text);
        }
        comments.push(CommentRecord {
            id: CommentId::new(format!("comment-{i}")),
            author_id: users[rng.gen_range(0..users.len())].clone(),
            text,
            created_at: time,
            like_count: rng.gen_range(0..=opt.max_likes),
            parent_id,
            avatar_url: None,
        });
    }

    println!("{}", serde_json::to_string_pretty(&comments)?);
    Ok(())
}
