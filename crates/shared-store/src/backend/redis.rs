/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Redis store backend
//!
//! Field maps are Redis hashes, blobs are plain string keys (`SETEX` when an
//! expiry is requested), live-id indexes are Redis sets. All commands are
//! issued synchronously on the caller's thread; connection-level timeouts are
//! configured on the Redis client, not here.

use crate::{BlobStore, FieldMapStore, RawFields, Result, SetStore, StoreError};
use ahash::AHashSet;
use std::collections::HashMap;
use tracing::debug;

/// Redis-backed shared-state store.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Connects to the given Redis URL and verifies the connection with a
    /// `PING`.
    pub fn open(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| StoreError::Unavailable(format!("Redis connection failed: {err}")))?;

        let mut conn = client
            .get_connection()
            .map_err(|err| StoreError::Unavailable(format!("Redis connection failed: {err}")))?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|err| StoreError::Unavailable(format!("Redis ping failed: {err}")))?;

        debug!(url = redis_url, "Connected to Redis shared-state store");
        Ok(Self { client })
    }

    fn conn(&self) -> Result<redis::Connection> {
        self.client
            .get_connection()
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }
}

impl FieldMapStore for RedisStore {
    fn exists(&self, key: &str) -> Result<bool> {
        redis::cmd("EXISTS")
            .arg(key)
            .query::<bool>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn get_all(&self, key: &str) -> Result<Option<RawFields>> {
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        // An empty hash does not exist in Redis
        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fields.into_iter().collect()))
        }
    }

    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn set_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query::<()>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn set_fields(&self, key: &str, fields: &RawFields) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query::<()>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn delete_field(&self, key: &str, field: &str) -> Result<()> {
        redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query::<()>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        redis::cmd("DEL")
            .arg(key)
            .query::<()>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

impl BlobStore for RedisStore {
    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        redis::cmd("GET")
            .arg(key)
            .query(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn set_blob(&self, key: &str, value: &[u8], ttl: Option<std::time::Duration>) -> Result<()> {
        match ttl {
            Some(ttl) => redis::cmd("SETEX")
                .arg(key)
                .arg(ttl.as_secs().max(1))
                .arg(value)
                .query::<()>(&mut self.conn()?),
            None => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query::<()>(&mut self.conn()?),
        }
        .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn delete_blob(&self, key: &str) -> Result<()> {
        redis::cmd("DEL")
            .arg(key)
            .query::<()>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

impl SetStore for RedisStore {
    fn set_add(&self, key: &str, member: &str) -> Result<()> {
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query::<()>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query::<()>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn set_members(&self, key: &str) -> Result<AHashSet<String>> {
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(members.into_iter().collect())
    }

    fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query::<bool>(&mut self.conn()?)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}
