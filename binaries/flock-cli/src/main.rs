//! Flock CLI
//!
//! Drive the social core from a terminal. Results are printed as JSON
//! resources (`Success` or `Failure` with an error kind).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use flock_config::Config;
use flock_core::{Comment, Post, ProfileUpdate, Resource, StaticIdentity, User};
use flock_social::{HomeFeed, Page, PostFeed, ProfileFeed, SocialRepository, SocialSettings};
use flock_store::{CollectionName, Document, DocumentStore, MemoryStore, MongoStore};

#[derive(Parser)]
#[command(name = "flock")]
#[command(about = "Flock - follows, likes and newest-first feeds")]
#[command(version)]
struct Cli {
    /// Act as this user
    #[arg(long = "as", global = true, default_value = "demo")]
    caller: String,

    /// Use a seeded in-memory store instead of MongoDB
    #[arg(long, global = true)]
    memory: bool,

    /// Config file (defaults to <config_dir>/flock/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Posts by everyone you follow
    Home {
        /// Number of pages to fetch
        #[arg(short, long, default_value_t = 1)]
        pages: usize,
    },

    /// Posts by one user
    Profile {
        uid: String,

        #[arg(short, long, default_value_t = 1)]
        pages: usize,
    },

    /// Like or unlike a post
    Like { post_id: String },

    /// Follow or unfollow a user
    Follow { uid: String },

    /// Comments on a post, newest first
    Comments { post_id: String },

    /// Comment on a post
    Comment { post_id: String, text: String },

    /// Show a user profile
    User { uid: String },

    /// Users who liked a post
    Likes { post_id: String },

    /// Find users by username prefix
    Search { query: String },

    /// Publish a post
    Post {
        text: String,

        /// URL of an already uploaded image
        #[arg(long)]
        image_url: Option<String>,
    },

    /// Delete one of your posts
    DeletePost { post_id: String },

    /// Update your profile
    UpdateProfile {
        #[arg(long, default_value = "")]
        username: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        picture: Option<String>,
    },

    /// Register a user
    Register { uid: String, username: String },
}

/// Post as printed, derived fields included
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostView {
    id: String,
    author_uid: String,
    author_username: String,
    author_profile_picture_url: String,
    text: String,
    image_url: String,
    date: i64,
    is_liked: bool,
    likes: usize,
}

impl From<&Post> for PostView {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            author_uid: post.author_uid.clone(),
            author_username: post.author_username.clone(),
            author_profile_picture_url: post.author_profile_picture_url.clone(),
            text: post.text.clone(),
            image_url: post.image_url.clone(),
            date: post.date,
            is_liked: post.is_liked,
            likes: post.liked_by.len(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageView {
    posts: Vec<PostView>,
    next: Option<String>,
    orphaned: Vec<String>,
}

impl From<&Page> for PageView {
    fn from(page: &Page) -> Self {
        Self {
            posts: page.posts.iter().map(PostView::from).collect(),
            next: page.next.as_ref().map(|c| c.encode()),
            orphaned: page.orphaned.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    uid: String,
    username: String,
    profile_picture_url: String,
    description: String,
    follows: usize,
    is_following: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            uid: user.uid.clone(),
            username: user.username.clone(),
            profile_picture_url: user.profile_picture_url.clone(),
            description: user.description.clone(),
            follows: user.follows.len(),
            is_following: user.is_following,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentView {
    comment_id: String,
    uid: String,
    username: String,
    comment: String,
    date: i64,
}

impl From<&Comment> for CommentView {
    fn from(comment: &Comment) -> Self {
        Self {
            comment_id: comment.comment_id.clone(),
            uid: comment.uid.clone(),
            username: comment.username.clone(),
            comment: comment.comment.clone(),
            date: comment.date,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("flock=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::load()?,
    };

    let store: Arc<dyn DocumentStore> = if cli.memory {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        seed_demo(&store).await?;
        store
    } else {
        let store = MongoStore::connect(&config.mongodb)
            .await
            .context("failed to connect to MongoDB")?;
        Arc::new(store)
    };

    let repo = Arc::new(SocialRepository::new(
        store,
        Arc::new(StaticIdentity::signed_in(cli.caller.as_str())),
        SocialSettings::from(&config),
    ));

    match cli.command {
        Commands::Home { pages } => cmd_feed(&HomeFeed::new(Arc::clone(&repo)), pages).await,
        Commands::Profile { uid, pages } => {
            cmd_feed(&ProfileFeed::new(Arc::clone(&repo), uid), pages).await
        }
        Commands::Like { post_id } => emit(repo.toggle_like(&post_id).await),
        Commands::Follow { uid } => emit(repo.toggle_follow(&uid).await),
        Commands::Comments { post_id } => emit(
            repo.comments_for_post(&post_id)
                .await
                .map(|comments| comments.iter().map(CommentView::from).collect::<Vec<_>>()),
        ),
        Commands::Comment { post_id, text } => emit(
            repo.create_comment(&post_id, &text)
                .await
                .map(|c| CommentView::from(&c)),
        ),
        Commands::User { uid } => emit(repo.get_user(&uid).await.map(|u| UserView::from(&u))),
        Commands::Likes { post_id } => emit(
            repo.users_who_liked(&post_id)
                .await
                .map(|users| users.iter().map(UserView::from).collect::<Vec<_>>()),
        ),
        Commands::Search { query } => emit(
            repo.search_users(&query)
                .await
                .map(|users| users.iter().map(UserView::from).collect::<Vec<_>>()),
        ),
        Commands::Post { text, image_url } => emit(
            repo.create_post(&text, image_url.as_deref())
                .await
                .map(|p| PostView::from(&p)),
        ),
        Commands::DeletePost { post_id } => {
            emit(repo.delete_post(&post_id).await.map(|p| PostView::from(&p)))
        }
        Commands::UpdateProfile {
            username,
            description,
            picture,
        } => {
            let update = ProfileUpdate {
                uid_to_update: cli.caller.clone(),
                username,
                description,
                profile_picture_url: picture,
            };
            emit(repo.update_profile(update).await.map(|u| UserView::from(&u)))
        }
        Commands::Register { uid, username } => emit(
            repo.create_user(&uid, &username)
                .await
                .map(|u| UserView::from(&u)),
        ),
    }
}

/// Print one JSON resource per fetched page
async fn cmd_feed(feed: &dyn PostFeed, pages: usize) -> Result<()> {
    let mut session = match feed.posts().await {
        Ok(session) => session,
        Err(e) => return emit::<PageView>(Err(e)),
    };

    for _ in 0..pages.max(1) {
        match session.next_page().await {
            Some(page) => emit(page.map(|p| PageView::from(&p)))?,
            None => {
                tracing::info!("Feed {} exhausted", session.filter());
                break;
            }
        }
    }
    Ok(())
}

fn emit<T: Serialize>(result: flock_core::Result<T>) -> Result<()> {
    let resource = Resource::from_result(result);
    println!("{}", serde_json::to_string_pretty(&resource)?);
    Ok(())
}

/// Users, follows and posts for `--memory` runs
async fn seed_demo(store: &Arc<dyn DocumentStore>) -> Result<()> {
    let now = flock_core::now_millis();
    let people = [
        ("demo", "demo", vec!["alice", "bob"]),
        ("alice", "alice", vec!["bob"]),
        ("bob", "bob", vec![]),
        ("carol", "carol", vec!["alice"]),
    ];
    for (uid, username, follows) in people {
        let mut user = User::new(uid, username);
        user.follows = follows.into_iter().map(String::from).collect();
        store
            .insert(CollectionName::Users, Document::encode(uid, &user)?)
            .await?;
    }

    let posts = [
        ("alice", "first light over the bay"),
        ("bob", "new keyboard day"),
        ("carol", "nobody follows me yet"),
        ("alice", "coffee, then code"),
        ("bob", "ship it"),
    ];
    for (i, (author, text)) in posts.into_iter().enumerate() {
        let mut post = Post::new(author, text);
        post.date = now - (i as i64) * 60_000;
        store
            .insert(CollectionName::Posts, Document::encode(post.id.clone(), &post)?)
            .await?;
    }

    tracing::debug!("Seeded in-memory store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_view_keeps_derived_author_fields() {
        let mut post = Post::new("a1", "hello");
        post.author_username = "alice".into();
        post.author_profile_picture_url = "https://img/alice".into();
        post.is_liked = true;
        post.liked_by = vec!["demo".into()];
        let page = Page {
            posts: vec![post],
            next: None,
            orphaned: vec!["gone".into()],
        };

        let json = serde_json::to_value(PageView::from(&page)).unwrap();
        let first = &json["posts"][0];
        assert_eq!(first["authorUsername"], "alice");
        assert_eq!(first["authorProfilePictureUrl"], "https://img/alice");
        assert_eq!(first["isLiked"], true);
        assert_eq!(first["likes"], 1);
        assert!(json["next"].is_null());
        assert_eq!(json["orphaned"][0], "gone");
    }
}
