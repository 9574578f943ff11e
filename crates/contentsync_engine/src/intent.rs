//! State shared by push and pull intents.

use crate::content::LocalItem;
use crate::context::RequestContext;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::ledger::StatusRecord;
use contentsync_protocol::{Channel, ItemRef, SyncAction, Value};
use std::fmt;

/// One item bound to one channel and its status record.
///
/// Construction looks up the status record and creates an empty one if the
/// channel has never seen the item.
pub struct IntentBase<'a> {
    engine: &'a SyncEngine,
    request: &'a RequestContext,
    item: ItemRef,
    channel: Channel,
    action: SyncAction,
    version: String,
    language: Option<String>,
    status: StatusRecord,
    entity: Option<LocalItem>,
}

impl<'a> IntentBase<'a> {
    pub(crate) fn new(
        engine: &'a SyncEngine,
        request: &'a RequestContext,
        item: ItemRef,
        channel: Channel,
        action: SyncAction,
    ) -> SyncResult<Self> {
        let version = engine
            .registry()
            .type_version(&item.entity_type, &item.bundle)?;
        let status = engine.ledger().get_or_create(&item, &channel, &version)?;
        Ok(Self {
            engine,
            request,
            item,
            channel,
            action,
            version,
            language: None,
            status,
            entity: None,
        })
    }

    /// The engine this intent runs on.
    pub fn engine(&self) -> &'a SyncEngine {
        self.engine
    }

    /// The request this intent belongs to.
    pub fn request(&self) -> &'a RequestContext {
        self.request
    }

    /// The item.
    pub fn item(&self) -> &ItemRef {
        &self.item
    }

    /// The channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// The action; inferred once the intent executes.
    pub fn action(&self) -> SyncAction {
        self.action
    }

    pub(crate) fn set_action(&mut self, action: SyncAction) {
        self.action = action;
    }

    /// Current entity-type version of the item's type.
    pub fn entity_type_version(&self) -> &str {
        &self.version
    }

    /// Status record as of construction or the last update by this intent.
    pub fn status(&self) -> &StatusRecord {
        &self.status
    }

    pub(crate) fn set_status(&mut self, status: StatusRecord) {
        self.status = status;
    }

    /// Translation that field access currently targets.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Redirects field access to a translation, or back to the base language
    /// with `None`.
    pub fn change_translation_language(&mut self, language: Option<&str>) {
        self.language = language.map(str::to_string);
    }

    /// Binds the local item.
    ///
    /// Binding twice is a programming error.
    pub fn set_entity(&mut self, entity: LocalItem) -> SyncResult<()> {
        if self.entity.is_some() {
            return Err(SyncError::AlreadyBound {
                item: self.item.to_string(),
            });
        }
        if !entity.reference.same_item(&self.item) {
            return Err(SyncError::data(format!(
                "cannot bind {} to an intent for {}",
                entity.reference, self.item
            )));
        }
        self.entity = Some(entity);
        Ok(())
    }

    /// The bound local item.
    pub fn entity(&self) -> Option<&LocalItem> {
        self.entity.as_ref()
    }

    /// The bound local item, mutably.
    pub fn entity_mut(&mut self) -> Option<&mut LocalItem> {
        self.entity.as_mut()
    }

    pub(crate) fn entity_slot(&mut self) -> &mut Option<LocalItem> {
        &mut self.entity
    }

    /// Binds the stored local item if one exists and none is bound yet.
    pub(crate) fn load_entity(&mut self) -> SyncResult<bool> {
        if self.entity.is_none() {
            self.entity = self.engine.content().load(&self.item)?;
        }
        Ok(self.entity.is_some())
    }

    /// Reads a field of the bound item in the current language.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.entity
            .as_ref()
            .and_then(|entity| entity.field(self.language.as_deref(), name))
    }

    /// Writes a field of the bound item in the current language.
    pub fn set_field(&mut self, name: &str, value: Value) -> SyncResult<()> {
        let language = self.language.clone();
        let entity = self
            .entity
            .as_mut()
            .ok_or_else(|| SyncError::data(format!("no local item bound for {}", self.item)))?;
        entity.set_field(language.as_deref(), name, value);
        Ok(())
    }
}

impl fmt::Debug for IntentBase<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntentBase")
            .field("item", &self.item)
            .field("channel", &self.channel)
            .field("action", &self.action)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

/// Common surface of push and pull intents.
pub trait SyncIntent<'a> {
    /// Push or pull reason.
    type Reason: Copy + fmt::Display;
    /// What `execute` reports.
    type Outcome;

    /// Shared state.
    fn base(&self) -> &IntentBase<'a>;

    /// Shared state, mutably.
    fn base_mut(&mut self) -> &mut IntentBase<'a>;

    /// Why the intent was created.
    fn reason(&self) -> Self::Reason;

    /// Runs the intent to completion.
    fn execute(&mut self) -> SyncResult<Self::Outcome>;

    /// The item.
    fn item<'s>(&'s self) -> &'s ItemRef
    where
        'a: 's,
    {
        self.base().item()
    }

    /// The channel.
    fn channel<'s>(&'s self) -> &'s Channel
    where
        'a: 's,
    {
        self.base().channel()
    }

    /// The action.
    fn action(&self) -> SyncAction {
        self.base().action()
    }

    /// The status record.
    fn status<'s>(&'s self) -> &'s StatusRecord
    where
        'a: 's,
    {
        self.base().status()
    }

    /// The bound local item.
    fn entity<'s>(&'s self) -> Option<&'s LocalItem>
    where
        'a: 's,
    {
        self.base().entity()
    }

    /// Current translation.
    fn language<'s>(&'s self) -> Option<&'s str>
    where
        'a: 's,
    {
        self.base().language()
    }

    /// See [`IntentBase::change_translation_language`].
    fn change_translation_language(&mut self, language: Option<&str>) {
        self.base_mut().change_translation_language(language);
    }
}
