use std::collections::{HashMap, HashSet};

use snafu::OptionExt as _;
use tracing::instrument;

use super::{EngineError, InvalidInputSnafu, UnauthenticatedSnafu};
use crate::model::{Comment, NewComment, Record, User, Video};
use crate::store::{Acl, DocumentId, DocumentStore, Filter};

/// A top-level comment and every reply beneath it, oldest reply first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

/// Assembles a flat list of comments, newest first, into top-level comments with replies.
///
/// Nesting is one level deep: a reply to a reply is filed under the top-level comment its
/// chain of parents ends at. A comment whose parent is not in the list is top-level, and so is
/// a comment whose chain of parents loops back to itself. Top-level comments keep their input
/// order; replies are sorted by creation time. Every input comment appears exactly once.
pub fn build_comment_tree(comments: Vec<Comment>) -> Vec<CommentNode> {
    let links = Links::new(&comments);

    let (roots, replies): (Vec<_>, Vec<_>) = comments
        .into_iter()
        .partition(|comment| links.is_root(&comment.id));

    let mut forest = Vec::with_capacity(roots.len());
    let mut positions = HashMap::with_capacity(roots.len());
    for comment in roots {
        positions.insert(comment.id.clone(), forest.len());
        forest.push(CommentNode {
            comment,
            replies: Vec::new(),
        });
    }

    for reply in replies {
        let root = links.root_of(&reply.id).clone();
        match positions.get(&root) {
            Some(&position) => forest[position].replies.push(reply),
            None => forest.push(CommentNode {
                comment: reply,
                replies: Vec::new(),
            }),
        }
    }

    for node in &mut forest {
        node.replies.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
    }

    forest
}

/// Parent links that resolve inside one batch of comments.
struct Links {
    parents: HashMap<Record<Comment>, Record<Comment>>,
    cycles: HashSet<Record<Comment>>,
}

impl Links {
    fn new(comments: &[Comment]) -> Self {
        let known: HashSet<_> = comments.iter().map(|comment| &comment.id).collect();
        let parents: HashMap<_, _> = comments
            .iter()
            .filter_map(|comment| {
                let parent = comment.parent_id.as_ref().filter(|parent| known.contains(parent))?;
                Some((comment.id.clone(), parent.clone()))
            })
            .collect();
        let cycles = cycle_members(&parents);

        Self { parents, cycles }
    }

    fn is_root(&self, id: &Record<Comment>) -> bool {
        !self.parents.contains_key(id) || self.cycles.contains(id)
    }

    fn root_of<'a>(&'a self, id: &'a Record<Comment>) -> &'a Record<Comment> {
        let mut current = id;
        while !self.is_root(current) {
            match self.parents.get(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }
}

fn cycle_members(parents: &HashMap<Record<Comment>, Record<Comment>>) -> HashSet<Record<Comment>> {
    let mut cycles = HashSet::new();
    let mut visited = HashSet::new();

    for start in parents.keys() {
        let mut path: Vec<&Record<Comment>> = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if visited.contains(id) {
                break;
            }
            if let Some(position) = path.iter().position(|seen| *seen == id) {
                cycles.extend(path[position..].iter().map(|id| (*id).clone()));
                break;
            }
            path.push(id);
            current = parents.get(id);
        }
        visited.extend(path);
    }

    cycles
}

/// The comments of a video as shown: a forest, or an error state when they could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommentThread {
    pub comments: Vec<CommentNode>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommentService<S> {
    store: S,
    limit: u32,
}

impl<S: DocumentStore> CommentService<S> {
    pub fn new(store: S, limit: u32) -> Self {
        Self { store, limit }
    }

    /// Reads the newest comments of a video and assembles them. Failures come back as an empty
    /// thread carrying the error message.
    #[instrument(skip(self))]
    pub async fn load(&self, video_id: &Record<Video>) -> CommentThread {
        let filters = [
            Filter::equal("video_id", video_id.as_str()),
            Filter::newest_first(),
        ];

        match Comment::list(&self.store, &filters, self.limit).await {
            Ok((comments, total)) => {
                tracing::debug!(video_id = %video_id, loaded = comments.len(), total, "comments loaded");
                CommentThread {
                    comments: build_comment_tree(comments),
                    error: None,
                }
            }
            Err(error) => {
                tracing::warn!(video_id = %video_id, error = %error, "could not load comments");
                CommentThread {
                    comments: Vec::new(),
                    error: Some(error.to_string()),
                }
            }
        }
    }

    /// Posts a comment, or a reply when `parent_id` is given. The parent must be a comment on
    /// the same video.
    #[instrument(skip(self, body))]
    pub async fn post(
        &self, viewer: Option<&User>, video_id: &Record<Video>, body: &str,
        parent_id: Option<Record<Comment>>,
    ) -> Result<Comment, EngineError> {
        let author = viewer.context(UnauthenticatedSnafu)?;
        let body = body.trim();
        if body.is_empty() {
            return InvalidInputSnafu {
                reason: "a comment needs some text",
            }
            .fail();
        }

        if let Some(parent_id) = &parent_id {
            let parent = Comment::find(&self.store, parent_id).await?;
            if parent.video_id != *video_id {
                return InvalidInputSnafu {
                    reason: format!("comment `{parent_id}` belongs to another video"),
                }
                .fail();
            }
        }

        let draft = NewComment::new(
            video_id.clone(),
            author.id.clone(),
            author.name.clone(),
            body.to_string(),
            parent_id,
        );
        let comment =
            Comment::create(&self.store, DocumentId::Generate, &draft, Acl::owned_by(&author.id))
                .await?;

        tracing::info!(video_id = %video_id, comment_id = %comment.id, "comment posted");
        Ok(comment)
    }
}
