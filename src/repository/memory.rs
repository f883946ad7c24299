use super::{RepoError, RepoResult, Repository};
use crate::models::{
    Article, ArticleChanges, ArticleFilter, ArticlePage, ArticleView, Comment, Favorite,
    FeedParams, Following, NewArticle, NewUser, Profile, User, UserChanges,
};
use crate::schema::{self, Invariant, SchemaError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use uuid::Uuid;

/// The table set. Exists only after `ensure_schema`.
#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    // Insertion order doubles as the newest-first listing order.
    articles: Vec<Article>,
    comments: BTreeMap<i64, Comment>,
    next_comment_id: i64,
    favorites: HashSet<Favorite>,
    followings: HashSet<Following>,
    created: Vec<&'static str>,
}

impl Tables {
    fn user_by_username(&self, username: &str) -> RepoResult<&User> {
        self.users
            .values()
            .find(|u| u.username == username)
            .ok_or(RepoError::NotFound("profile"))
    }

    fn article_index(&self, slug: &str) -> RepoResult<usize> {
        self.articles
            .iter()
            .position(|a| a.slug == slug)
            .ok_or(RepoError::NotFound("article"))
    }

    fn check_user_unique(&self, id: Option<Uuid>, username: &str, email: &str) -> RepoResult<()> {
        for user in self.users.values().filter(|u| Some(u.id) != id) {
            if user.username == username {
                return Err(RepoError::InvariantViolation(Invariant::DuplicateUsername));
            }
            if user.email == email {
                return Err(RepoError::InvariantViolation(Invariant::DuplicateEmail));
            }
        }
        Ok(())
    }

    fn check_slug_unique(&self, slug: &str, except: Option<Uuid>) -> RepoResult<()> {
        if self
            .articles
            .iter()
            .any(|a| a.slug == slug && Some(a.id) != except)
        {
            return Err(RepoError::InvariantViolation(Invariant::DuplicateSlug));
        }
        Ok(())
    }

    fn view(&self, article: &Article, viewer: Option<Uuid>) -> ArticleView {
        let author_username = self
            .users
            .get(&article.author_id)
            .map(|u| u.username.clone())
            .unwrap_or_default();
        let favorites_count = self
            .favorites
            .iter()
            .filter(|f| f.article_id == article.id)
            .count() as i64;
        let favorited = viewer.is_some_and(|user_id| {
            self.favorites.contains(&Favorite {
                user_id,
                article_id: article.id,
            })
        });

        ArticleView {
            id: article.id,
            slug: article.slug.clone(),
            title: article.title.clone(),
            description: article.description.clone(),
            body: article.body.clone(),
            tag_list: article.tag_list.clone(),
            author_id: article.author_id,
            author_username,
            created_at: article.created_at,
            updated_at: article.updated_at,
            favorites_count,
            favorited,
        }
    }

    fn page<'a>(
        &self,
        matching: impl Iterator<Item = &'a Article>,
        viewer: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> ArticlePage {
        let matching: Vec<&Article> = matching.collect();
        let total = matching.len() as i64;
        let articles = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|a| self.view(a, viewer))
            .collect();
        ArticlePage { articles, total }
    }

    fn profile(&self, user: &User, viewer: Option<Uuid>) -> Profile {
        let following = viewer.is_some_and(|follower_id| {
            self.followings.contains(&Following {
                follower_id,
                followee_id: user.id,
            })
        });
        Profile {
            username: user.username.clone(),
            bio: user.bio.clone(),
            image: user.image.clone(),
            following,
        }
    }
}

/// MemoryRepository
///
/// In-process `Repository` with the same invariant semantics as the Postgres backend.
/// One mutex covers every table, so each check-then-write runs atomically.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Option<Tables>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables created so far, in creation order.
    pub fn tables(&self) -> Vec<&'static str> {
        self.tables
            .lock()
            .as_ref()
            .map(|t| t.created.clone())
            .unwrap_or_default()
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> RepoResult<T>) -> RepoResult<T> {
        let mut guard = self.tables.lock();
        let tables = guard.as_mut().ok_or(RepoError::SchemaMissing)?;
        f(tables)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    /// Creates the table set on first call. Later calls keep existing rows.
    async fn ensure_schema(&self) -> Result<(), SchemaError> {
        let mut guard = self.tables.lock();
        let tables = guard.get_or_insert_with(Tables::default);
        for name in schema::table_names() {
            if !tables.created.contains(&name) {
                tables.created.push(name);
            }
        }
        Ok(())
    }

    // --- USERS ---

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        self.with_tables(|t| {
            t.check_user_unique(None, &user.username, &user.email)?;
            let now = Utc::now();
            let created = User {
                id: Uuid::new_v4(),
                username: user.username,
                email: user.email,
                password_hash: user.password_hash,
                bio: None,
                image: None,
                created_at: now,
                updated_at: now,
            };
            t.users.insert(created.id, created.clone());
            Ok(created)
        })
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        self.with_tables(|t| Ok(t.users.get(&id).cloned()))
    }

    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        self.with_tables(|t| Ok(t.users.values().find(|u| u.email == email).cloned()))
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<User> {
        self.with_tables(|t| {
            let current = t.users.get(&id).ok_or(RepoError::NotFound("user"))?;
            let username = changes.username.unwrap_or_else(|| current.username.clone());
            let email = changes.email.unwrap_or_else(|| current.email.clone());
            t.check_user_unique(Some(id), &username, &email)?;

            let user = t.users.get_mut(&id).ok_or(RepoError::NotFound("user"))?;
            user.username = username;
            user.email = email;
            if let Some(hash) = changes.password_hash {
                user.password_hash = hash;
            }
            if changes.bio.is_some() {
                user.bio = changes.bio;
            }
            if changes.image.is_some() {
                user.image = changes.image;
            }
            user.updated_at = Utc::now();
            Ok(user.clone())
        })
    }

    // --- PROFILES & FOLLOWING ---

    async fn get_profile(&self, username: &str, viewer: Option<Uuid>) -> RepoResult<Profile> {
        self.with_tables(|t| {
            let user = t.user_by_username(username)?;
            Ok(t.profile(user, viewer))
        })
    }

    async fn follow(&self, follower: Uuid, followee: &str) -> RepoResult<Profile> {
        self.with_tables(|t| {
            let target = t.user_by_username(followee)?.clone();
            if target.id == follower {
                return Err(RepoError::InvariantViolation(Invariant::SelfFollow));
            }
            if !t.users.contains_key(&follower) {
                return Err(RepoError::NotFound("referenced row"));
            }
            let edge = Following {
                follower_id: follower,
                followee_id: target.id,
            };
            if !t.followings.insert(edge) {
                return Err(RepoError::InvariantViolation(Invariant::DuplicateFollow));
            }
            Ok(t.profile(&target, Some(follower)))
        })
    }

    async fn unfollow(&self, follower: Uuid, followee: &str) -> RepoResult<Profile> {
        self.with_tables(|t| {
            let target = t.user_by_username(followee)?.clone();
            t.followings.remove(&Following {
                follower_id: follower,
                followee_id: target.id,
            });
            Ok(t.profile(&target, Some(follower)))
        })
    }

    // --- ARTICLES ---

    async fn create_article(&self, author: Uuid, article: NewArticle) -> RepoResult<ArticleView> {
        self.with_tables(|t| {
            if !t.users.contains_key(&author) {
                return Err(RepoError::NotFound("referenced row"));
            }
            let slug = article.slug();
            t.check_slug_unique(&slug, None)?;

            let now = Utc::now();
            let created = Article {
                id: Uuid::new_v4(),
                slug,
                title: article.title,
                description: article.description,
                body: article.body,
                tag_list: article.tag_list,
                author_id: author,
                created_at: now,
                updated_at: now,
            };
            let view = t.view(&created, Some(author));
            t.articles.push(created);
            Ok(view)
        })
    }

    async fn get_article(&self, slug: &str, viewer: Option<Uuid>) -> RepoResult<ArticleView> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            Ok(t.view(&t.articles[index], viewer))
        })
    }

    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        viewer: Option<Uuid>,
    ) -> RepoResult<ArticlePage> {
        self.with_tables(|t| {
            let author_id = match &filter.author {
                Some(name) => match t.user_by_username(name) {
                    Ok(user) => Some(user.id),
                    Err(_) => return Ok(ArticlePage::default()),
                },
                None => None,
            };
            let favorited_by = match &filter.favorited {
                Some(name) => match t.user_by_username(name) {
                    Ok(user) => Some(user.id),
                    Err(_) => return Ok(ArticlePage::default()),
                },
                None => None,
            };

            let matching = t.articles.iter().rev().filter(|a| {
                filter
                    .tag
                    .as_ref()
                    .is_none_or(|tag| a.tag_list.contains(tag))
                    && author_id.is_none_or(|id| a.author_id == id)
                    && favorited_by.is_none_or(|user_id| {
                        t.favorites.contains(&Favorite {
                            user_id,
                            article_id: a.id,
                        })
                    })
            });
            Ok(t.page(matching, viewer, filter.limit(), filter.offset()))
        })
    }

    async fn feed_articles(&self, user: Uuid, params: FeedParams) -> RepoResult<ArticlePage> {
        self.with_tables(|t| {
            let followed: HashSet<Uuid> = t
                .followings
                .iter()
                .filter(|f| f.follower_id == user)
                .map(|f| f.followee_id)
                .collect();
            let matching = t
                .articles
                .iter()
                .rev()
                .filter(|a| followed.contains(&a.author_id));
            Ok(t.page(matching, Some(user), params.limit(), params.offset()))
        })
    }

    async fn update_article(
        &self,
        slug: &str,
        author: Uuid,
        changes: ArticleChanges,
    ) -> RepoResult<ArticleView> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            let id = t.articles[index].id;
            if t.articles[index].author_id != author {
                return Err(RepoError::Forbidden("article"));
            }
            let new_slug = changes.slug();
            if let Some(new_slug) = &new_slug {
                t.check_slug_unique(new_slug, Some(id))?;
            }

            let article = &mut t.articles[index];
            if let Some(new_slug) = new_slug {
                article.slug = new_slug;
            }
            if let Some(title) = changes.title {
                article.title = title;
            }
            if let Some(description) = changes.description {
                article.description = description;
            }
            if let Some(body) = changes.body {
                article.body = body;
            }
            article.updated_at = Utc::now();

            Ok(t.view(&t.articles[index], Some(author)))
        })
    }

    async fn delete_article(&self, slug: &str, author: Uuid) -> RepoResult<()> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            if t.articles[index].author_id != author {
                return Err(RepoError::Forbidden("article"));
            }
            let removed = t.articles.remove(index);
            t.comments.retain(|_, c| c.article_id != removed.id);
            t.favorites.retain(|f| f.article_id != removed.id);
            Ok(())
        })
    }

    // --- FAVORITES ---

    async fn favorite_article(&self, user: Uuid, slug: &str) -> RepoResult<ArticleView> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            if !t.users.contains_key(&user) {
                return Err(RepoError::NotFound("referenced row"));
            }
            let pair = Favorite {
                user_id: user,
                article_id: t.articles[index].id,
            };
            if !t.favorites.insert(pair) {
                return Err(RepoError::InvariantViolation(Invariant::DuplicateFavorite));
            }
            Ok(t.view(&t.articles[index], Some(user)))
        })
    }

    async fn unfavorite_article(&self, user: Uuid, slug: &str) -> RepoResult<ArticleView> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            t.favorites.remove(&Favorite {
                user_id: user,
                article_id: t.articles[index].id,
            });
            Ok(t.view(&t.articles[index], Some(user)))
        })
    }

    async fn favorite_pair_count(&self, user: Uuid, slug: &str) -> RepoResult<i64> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            let article_id = t.articles[index].id;
            Ok(t
                .favorites
                .iter()
                .filter(|f| f.user_id == user && f.article_id == article_id)
                .count() as i64)
        })
    }

    // --- COMMENTS ---

    async fn add_comment(&self, slug: &str, author: Uuid, body: String) -> RepoResult<Comment> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            let author_username = t
                .users
                .get(&author)
                .map(|u| u.username.clone())
                .ok_or(RepoError::NotFound("referenced row"))?;

            t.next_comment_id += 1;
            let now = Utc::now();
            let comment = Comment {
                id: t.next_comment_id,
                body,
                article_id: t.articles[index].id,
                author_id: author,
                created_at: now,
                updated_at: now,
                author_username: Some(author_username),
            };
            t.comments.insert(comment.id, comment.clone());
            Ok(comment)
        })
    }

    async fn get_comments(&self, slug: &str) -> RepoResult<Vec<Comment>> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            let article_id = t.articles[index].id;
            Ok(t
                .comments
                .values()
                .filter(|c| c.article_id == article_id)
                .cloned()
                .collect())
        })
    }

    async fn delete_comment(&self, slug: &str, id: i64, author: Uuid) -> RepoResult<()> {
        self.with_tables(|t| {
            let index = t.article_index(slug)?;
            let article_id = t.articles[index].id;
            let owner = t
                .comments
                .get(&id)
                .filter(|c| c.article_id == article_id)
                .map(|c| c.author_id);
            match owner {
                None => Err(RepoError::NotFound("comment")),
                Some(owner) if owner != author => Err(RepoError::Forbidden("comment")),
                Some(_) => {
                    t.comments.remove(&id);
                    Ok(())
                }
            }
        })
    }

    // --- TAGS ---

    async fn get_tags(&self) -> RepoResult<Vec<String>> {
        self.with_tables(|t| {
            let tags: BTreeSet<&String> = t.articles.iter().flat_map(|a| &a.tag_list).collect();
            Ok(tags.into_iter().cloned().collect())
        })
    }
}
