//! Job record store.

use serde::Serialize;
use serde::de::DeserializeOwned;

use jobhive_core::{Batch, JobArgs, JobFields, JobId, StoreResult, codec, fields};

use crate::storage::JobStorage;

impl JobStorage {
    /// Upsert many fields of a job record.
    pub async fn set_properties(&self, id: &JobId, fields: &JobFields) -> StoreResult<()> {
        let mut batch = Batch::new();
        crate::storage::merge_fields(&mut batch, &self.keys.job(id.as_str()), Some(fields));
        self.store.exec(batch).await
    }

    /// Raw stored value of one field.
    pub async fn get_property(&self, id: &JobId, name: &str) -> StoreResult<Option<String>> {
        self.store.hget(&self.keys.job(id.as_str()), name).await
    }

    /// Encode `value` and store it under `name`.
    pub async fn set_property<T>(&self, id: &JobId, name: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode(value)?;
        self.store
            .hset(&self.keys.job(id.as_str()), name, &encoded)
            .await
    }

    /// Decoded value of one field.
    pub async fn get_job_property<T: DeserializeOwned>(
        &self,
        id: &JobId,
        name: &str,
    ) -> StoreResult<Option<T>> {
        match self.get_property(id, name).await? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every field of the record, `None` when it does not exist.
    pub async fn get_all(&self, id: &JobId) -> StoreResult<Option<JobFields>> {
        let all = self.store.hgetall(&self.keys.job(id.as_str())).await?;
        Ok((!all.is_empty()).then_some(all))
    }

    /// Values aligned with `names`.
    pub async fn get_selected(&self, id: &JobId, names: &[&str]) -> StoreResult<Vec<Option<String>>> {
        self.store.hmget(&self.keys.job(id.as_str()), names).await
    }

    /// Fetch the same fields for many jobs and decode each.
    ///
    /// A job whose selected fields are all missing, or that `decode`
    /// declines, maps to `None`.
    pub async fn get_many_with_selected<T, F>(
        &self,
        ids: &[String],
        names: &[&str],
        decode: F,
    ) -> StoreResult<Vec<(JobId, Option<T>)>>
    where
        F: Fn(&[Option<String>]) -> Option<T>,
    {
        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            let values = self.store.hmget(&self.keys.job(id), names).await?;
            let decoded = if values.iter().all(Option::is_none) {
                None
            } else {
                decode(&values)
            };
            result.push((JobId::from(id.as_str()), decoded));
        }
        Ok(result)
    }

    pub async fn job_type(&self, id: &JobId) -> StoreResult<Option<String>> {
        self.get_property(id, fields::TYPE).await
    }

    /// Type and decoded arguments, `None` when the record has no type.
    pub async fn job_type_and_args(&self, id: &JobId) -> StoreResult<Option<(String, JobArgs)>> {
        let values = self.get_selected(id, &[fields::TYPE, fields::ARGS]).await?;
        let mut values = values.into_iter();
        let Some(job_type) = values.next().flatten() else {
            return Ok(None);
        };
        let args = match values.next().flatten() {
            Some(raw) => codec::decode(&raw)?,
            None => JobArgs::new(),
        };
        Ok(Some((job_type, args)))
    }
}
