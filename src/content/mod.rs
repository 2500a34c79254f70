//! Content-meta manager
//!
//! Interns (size, md5, sha256) triples behind a UID so file content identity
//! can be shared and compared without dereferencing node dictionaries.

use crate::domain::{ContentMeta, Uid, UidGenerator};
use crate::infrastructure::database::entities::content_meta;
use crate::infrastructure::database::Database;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

type TripleKey = (u64, Option<String>, Option<String>);

pub struct ContentMetaStore {
    db: Arc<Database>,
    generator: Arc<UidGenerator>,
    state: RwLock<ContentState>,
}

#[derive(Default)]
struct ContentState {
    by_uid: HashMap<Uid, ContentMeta>,
    by_triple: HashMap<TripleKey, Uid>,
}

impl ContentMetaStore {
    pub fn new(db: Arc<Database>, generator: Arc<UidGenerator>) -> Self {
        Self {
            db,
            generator,
            state: RwLock::new(ContentState::default()),
        }
    }

    pub async fn load(&self) -> Result<(), sea_orm::DbErr> {
        self.db.ensure_table(content_meta::Entity).await?;

        let mut state = self.state.write().await;
        for row in content_meta::Entity::find().all(self.db.conn()).await? {
            let meta = ContentMeta {
                content_uid: Uid(row.content_uid as u64),
                size_bytes: row.size_bytes as u64,
                md5: row.md5,
                sha256: row.sha256,
            };
            self.generator.ensure_next_uid_greater_than(meta.content_uid.0);
            state.by_triple.insert(
                (meta.size_bytes, meta.md5.clone(), meta.sha256.clone()),
                meta.content_uid,
            );
            state.by_uid.insert(meta.content_uid, meta);
        }
        info!("Loaded {} content-meta entries", state.by_uid.len());
        Ok(())
    }

    /// Intern a triple. Two files with the same (size, md5, sha256) always
    /// share one content UID.
    pub async fn get_or_create(
        &self,
        size_bytes: u64,
        md5: Option<String>,
        sha256: Option<String>,
    ) -> Result<Uid, sea_orm::DbErr> {
        let key = (size_bytes, md5.clone(), sha256.clone());
        {
            let state = self.state.read().await;
            if let Some(uid) = state.by_triple.get(&key) {
                return Ok(*uid);
            }
        }

        let mut state = self.state.write().await;
        if let Some(uid) = state.by_triple.get(&key) {
            return Ok(*uid);
        }

        let content_uid = self.generator.next_uid();
        content_meta::ActiveModel {
            content_uid: Set(content_uid.0 as i64),
            size_bytes: Set(size_bytes as i64),
            md5: Set(md5.clone()),
            sha256: Set(sha256.clone()),
        }
        .insert(self.db.conn())
        .await?;

        state.by_triple.insert(key, content_uid);
        state.by_uid.insert(
            content_uid,
            ContentMeta {
                content_uid,
                size_bytes,
                md5,
                sha256,
            },
        );
        Ok(content_uid)
    }

    pub async fn get(&self, content_uid: Uid) -> Option<ContentMeta> {
        self.state.read().await.by_uid.get(&content_uid).cloned()
    }
}
