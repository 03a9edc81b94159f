use crate::behavior::{parse_options, Behavior, BehaviorOptions};
use crate::event::{Event, EventCtx, Flow};
use crate::registry::Registry;
use crate::{debug, AppError, Model};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TTL_SECS: u64 = 600;

#[derive(Deserialize)]
struct CachedAttribute {
    ttl: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CachedAttributes {
    Names(Vec<String>),
    Detailed(BTreeMap<String, CachedAttribute>),
}

#[derive(Deserialize)]
struct CacheOptions {
    #[serde(default = "default_ttl")]
    ttl: u64,
    attributes: CachedAttributes,
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

/// Keeps large attributes out of the record body, each in its own expiring key next to it.
///
/// On save the attribute is written with `SETEX` and left out of the record, on read it is put
/// back if it has not expired yet, on delete its key is removed.
#[derive(Clone, Debug)]
pub struct CacheAttributes {
    attributes: Vec<(String, Duration)>,
}

impl CacheAttributes {
    pub fn new<I, S>(attributes: I, ttl: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CacheAttributes { attributes: attributes.into_iter().map(|a| (a.into(), ttl)).collect() }
    }

    pub fn from_options(options: &BehaviorOptions, _registry: &Registry) -> Result<Arc<dyn Behavior>, AppError> {
        let opts: CacheOptions = parse_options("CacheAttributes", options)?;
        let default = Duration::from_secs(opts.ttl);
        let attributes = match opts.attributes {
            CachedAttributes::Names(names) => names.into_iter().map(|n| (n, default)).collect(),
            CachedAttributes::Detailed(map) => {
                map.into_iter().map(|(n, a)| (n, a.ttl.map_or(default, Duration::from_secs))).collect()
            }
        };
        Ok(Arc::new(CacheAttributes { attributes }))
    }

    fn key(ctx: &EventCtx<'_>, model: &Model, attr: &str) -> Result<String, AppError> {
        ctx.table.codec().attribute_key(ctx.table.name(), &model.primary_key(), attr)
    }

    fn stash(&self, ctx: &EventCtx<'_>, model: &mut Model) -> Result<(), AppError> {
        let conn = ctx.db.connection();
        for (attr, ttl) in &self.attributes {
            let Some(value) = model.get_attribute(attr).filter(|v| !v.is_null()) else {
                continue;
            };
            let key = Self::key(ctx, model, attr)?;
            conn.set_ex(&key, &ctx.table.codec().encode_value(value)?, *ttl)?;
            model.detach(attr);
        }
        Ok(())
    }

    fn restore(&self, ctx: &EventCtx<'_>, model: &mut Model) -> Result<(), AppError> {
        let conn = ctx.db.connection();
        for (attr, _) in &self.attributes {
            let key = Self::key(ctx, model, attr)?;
            match conn.get(&key)? {
                Some(bytes) => model.set_attribute_clean(attr.clone(), ctx.table.codec().decode_value(&key, &bytes)?),
                None => debug!("cached attribute {key} has expired"),
            }
        }
        Ok(())
    }

    fn evict(&self, ctx: &EventCtx<'_>, model: &Model) -> Result<(), AppError> {
        for (attr, _) in &self.attributes {
            ctx.db.connection().del(&Self::key(ctx, model, attr)?)?;
        }
        Ok(())
    }
}

impl Behavior for CacheAttributes {
    fn name(&self) -> &str {
        "CacheAttributes"
    }

    fn handles(&self, event: Event) -> bool {
        matches!(event, Event::BeforeSave | Event::AfterSave | Event::AfterRead | Event::AfterDelete)
    }

    fn handle(&self, event: Event, ctx: &EventCtx<'_>, model: &mut Model) -> Result<Flow, AppError> {
        match event {
            Event::BeforeSave => self.stash(ctx, model)?,
            Event::AfterSave => model.reattach(),
            Event::AfterRead => self.restore(ctx, model)?,
            Event::AfterDelete => self.evict(ctx, model)?,
            _ => {}
        }
        Ok(Flow::Continue)
    }
}
