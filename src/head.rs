//! The live document head: where compiled style sections are inserted.
//!
//! An inserted element's sheet may not be populated yet (a head backed by an
//! asynchronous style engine parses after insertion). Scoping such a sheet
//! waits for its load notification with the element disabled, so unscoped
//! rules never apply.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::sync::Notify;

use crate::css::{scope_rules, StyleSheet};
use crate::dom::Attributes;
use crate::error::{LoaderError, Result};

/// Returned when an inserted element's sheet has not been populated yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetNotReady;

/// A `<style>` element appended to the head.
#[derive(Debug)]
pub struct StyleElement {
    attributes: Attributes,
    text: String,
    owner: String,
    sheet: RefCell<Option<StyleSheet>>,
    disabled: Cell<bool>,
    loaded: Notify,
}

impl StyleElement {
    fn new(attributes: Attributes, text: String, owner: String) -> Self {
        Self {
            attributes,
            text,
            owner,
            sheet: RefCell::new(None),
            disabled: Cell::new(false),
            loaded: Notify::new(),
        }
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Source text as inserted.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// URL of the component that inserted this element.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.get()
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.set(disabled);
    }

    pub fn is_populated(&self) -> bool {
        self.sheet.borrow().is_some()
    }

    /// Text of the live sheet, or the source text while unpopulated.
    pub fn css_text(&self) -> String {
        match &*self.sheet.borrow() {
            Some(sheet) => sheet.css_text(),
            None => self.text.clone(),
        }
    }

    /// Run `f` against the live sheet.
    pub fn with_sheet<R>(
        &self,
        f: impl FnOnce(&mut StyleSheet) -> R,
    ) -> std::result::Result<R, SheetNotReady> {
        match self.sheet.borrow_mut().as_mut() {
            Some(sheet) => Ok(f(sheet)),
            None => Err(SheetNotReady),
        }
    }

    /// Parse the source text into the live sheet and fire the load notification.
    pub fn populate(&self) {
        if self.sheet.borrow().is_none() {
            *self.sheet.borrow_mut() = Some(StyleSheet::parse(&self.text));
        }
        self.loaded.notify_one();
    }

    async fn wait_loaded(&self) {
        self.loaded.notified().await;
    }
}

#[derive(Debug, Default)]
struct HeadState {
    elements: RefCell<Vec<Rc<StyleElement>>>,
    deferred: bool,
}

/// Shared handle to the document head.
#[derive(Debug, Clone, Default)]
pub struct Head {
    state: Rc<HeadState>,
}

impl Head {
    /// A head that parses style sheets as soon as they are appended.
    pub fn new() -> Self {
        Self::default()
    }

    /// A head whose sheets stay unpopulated until [`Head::populate_pending`].
    pub fn deferred() -> Self {
        Self {
            state: Rc::new(HeadState {
                elements: RefCell::new(Vec::new()),
                deferred: true,
            }),
        }
    }

    /// Append a style element.
    pub fn append_style(&self, attributes: Attributes, text: String, owner: &str) -> Rc<StyleElement> {
        let element = Rc::new(StyleElement::new(attributes, text, owner.to_string()));
        if !self.state.deferred {
            element.populate();
        }
        self.state.elements.borrow_mut().push(Rc::clone(&element));
        tracing::trace!(owner, deferred = self.state.deferred, "Style element appended");
        element
    }

    /// Populate every sheet still waiting to be parsed.
    pub fn populate_pending(&self) {
        for element in self.state.elements.borrow().iter() {
            if !element.is_populated() {
                element.populate();
            }
        }
    }

    /// Detach a previously appended element.
    pub fn remove(&self, element: &Rc<StyleElement>) {
        self.state
            .elements
            .borrow_mut()
            .retain(|existing| !Rc::ptr_eq(existing, element));
    }

    /// Inserted style elements in insertion order.
    pub fn styles(&self) -> Vec<Rc<StyleElement>> {
        self.state.elements.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.state.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.elements.borrow().is_empty()
    }
}

/// Scope the rules of an inserted element to `scope`.
///
/// An unpopulated sheet is retried exactly once, after its load
/// notification, with the element disabled in between.
pub async fn scope_styles(element: &StyleElement, scope: &str) -> Result<()> {
    if element.with_sheet(|sheet| scope_rules(sheet, scope)).is_ok() {
        return Ok(());
    }

    tracing::debug!(owner = element.owner(), "Style sheet not populated, waiting for load");
    element.set_disabled(true);
    element.wait_loaded().await;

    element
        .with_sheet(|sheet| scope_rules(sheet, scope))
        .map_err(|_| LoaderError::SheetUnavailable {
            url: element.owner().to_string(),
        })?;
    element.set_disabled(false);
    Ok(())
}
