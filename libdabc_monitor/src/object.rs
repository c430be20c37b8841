use super::binary::unpack;
use super::error::ObjectError;
use super::transport::{
    binary_url, Request, RequestToken, ResponseBody, ResponseKind, Transport, TransportResult,
};

/// Lifecycle of a versioned object item. `Failed` is terminal and only left
/// through [ObjectItem::clear]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Init,
    WaitingForResponse,
    WaitingForMaster,
    Ready,
    Failed,
}

impl ObjectState {
    /// Documented transitions. `Failed` is entered through
    /// [ObjectItem::fail], never through here
    fn allows(self, to: ObjectState) -> bool {
        use ObjectState::*;
        matches!(
            (self, to),
            (Init, WaitingForResponse)
                | (WaitingForResponse, Ready)
                | (WaitingForResponse, WaitingForMaster)
                | (WaitingForResponse, Init)
                | (WaitingForMaster, Ready)
                | (Ready, WaitingForResponse)
        )
    }
}

/// Whether the item is itself a schema record other items decode against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRole {
    Master,
    Plain,
}

/// What a check or response handling step amounted to, for the caller to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// Nothing to do this tick
    Idle,
    /// A fetch went out
    Requested(RequestToken),
    /// Server confirmed the held version is still current; no reprocessing
    Unchanged,
    /// A new payload was adopted and can be shown
    Decoded,
    /// A schema record advanced; dependents should be rechecked
    MasterDecoded,
    /// Payload is stashed until the named master reaches the given version
    NeedMaster { master: String, version: i64 },
    /// Payload was structurally broken; the hierarchy should be reloaded
    Desync,
}

/// Payload held back because its schema dependency was not new enough yet
#[derive(Debug)]
struct StashedPayload {
    version: i64,
    required_master: i64,
    data: Vec<u8>,
}

/// State machine fetching and holding one binary-encoded object.
///
/// Decoding never runs against a schema older than the requirement carried in
/// the payload header; when the schema lags, the payload waits in
/// `WaitingForMaster` until the master item catches up
#[derive(Debug)]
pub struct ObjectItem {
    pub name: String,
    /// Full kind tag of the node, e.g. "ROOT.TH1D"
    pub class_name: String,
    pub role: ObjectRole,
    /// Absolute path of the schema record this item decodes against
    pub master: Option<String>,
    state: ObjectState,
    pub version: i64,
    data: Option<Vec<u8>>,
    stash: Option<StashedPayload>,
    pending: Option<RequestToken>,
    force: bool,
    rendered: bool,
}

impl ObjectItem {
    pub fn new(name: &str, class_name: &str, master: Option<String>) -> Self {
        Self {
            name: String::from(name),
            class_name: String::from(class_name),
            role: ObjectRole::Plain,
            master,
            state: ObjectState::Init,
            version: 0,
            data: None,
            stash: None,
            pending: None,
            force: true,
            rendered: false,
        }
    }

    /// Schema records start out `Ready` with nothing held; they are only
    /// fetched once a dependent asks for a version they do not have
    pub fn new_master(name: &str, class_name: &str) -> Self {
        Self {
            name: String::from(name),
            class_name: String::from(class_name),
            role: ObjectRole::Master,
            master: None,
            state: ObjectState::Ready,
            version: 0,
            data: None,
            stash: None,
            pending: None,
            force: false,
            rendered: false,
        }
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Version lookup dependents gate their decode on: holding a payload at
    /// least as new as the asked-for version
    pub fn has_version(&self, version: i64) -> bool {
        self.data.is_some() && self.version >= version
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    pub fn set_rendered(&mut self, rendered: bool) {
        self.rendered = rendered;
    }

    pub fn touch(&mut self) {
        self.force = true;
    }

    pub fn pending_token(&self) -> Option<RequestToken> {
        self.pending
    }

    fn transition(&mut self, to: ObjectState) -> Result<(), ObjectError> {
        if !self.state.allows(to) {
            let from = self.state;
            self.state = ObjectState::Failed;
            return Err(ObjectError::IllegalTransition { from, to });
        }
        self.state = to;
        Ok(())
    }

    fn submit(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Result<ObjectOutcome, ObjectError> {
        self.transition(ObjectState::WaitingForResponse)?;
        let request = Request {
            url: binary_url(&self.name, self.version),
            kind: ResponseKind::Binary,
        };
        let token = transport.submit(request);
        self.pending = Some(token);
        self.force = false;
        Ok(ObjectOutcome::Requested(token))
    }

    fn adopt(&mut self, version: i64, data: Vec<u8>) {
        self.version = version;
        self.data = Some(data);
    }

    /// Drop everything and return to the initial state. Also the only way out
    /// of `Failed`
    pub fn clear(&mut self, transport: &mut dyn Transport) {
        if let Some(token) = self.pending.take() {
            transport.cancel(token);
        }
        self.state = match self.role {
            ObjectRole::Master => ObjectState::Ready,
            ObjectRole::Plain => ObjectState::Init,
        };
        self.version = 0;
        self.data = None;
        self.stash = None;
        self.force = true;
    }

    /// Make a schema record fetch if it cannot serve the asked-for version yet
    pub fn ensure_version(
        &mut self,
        transport: &mut dyn Transport,
        version: i64,
    ) -> Result<ObjectOutcome, ObjectError> {
        if self.has_version(version) || self.pending.is_some() {
            return Ok(ObjectOutcome::Idle);
        }
        if self.state != ObjectState::Ready {
            return Ok(ObjectOutcome::Idle);
        }
        self.submit(transport)
    }

    /// Periodic tick. `master_version` is the version the referenced master
    /// currently holds a payload for, if any
    pub fn regular_check(
        &mut self,
        transport: &mut dyn Transport,
        monitoring: bool,
        master_version: Option<i64>,
    ) -> Result<ObjectOutcome, ObjectError> {
        match self.state {
            ObjectState::Failed | ObjectState::WaitingForResponse => Ok(ObjectOutcome::Idle),
            ObjectState::WaitingForMaster => {
                let required = match &self.stash {
                    Some(stash) => stash.required_master,
                    None => return Err(ObjectError::MissingPayload),
                };
                if master_version.unwrap_or(0) < required {
                    return Ok(ObjectOutcome::Idle);
                }
                // the schema caught up: run the deferred decode
                if let Some(stash) = self.stash.take() {
                    self.adopt(stash.version, stash.data);
                }
                self.transition(ObjectState::Ready)?;
                Ok(ObjectOutcome::Decoded)
            }
            ObjectState::Init => self.submit(transport),
            ObjectState::Ready => {
                if self.force || (monitoring && self.rendered) {
                    self.submit(transport)
                } else {
                    Ok(ObjectOutcome::Idle)
                }
            }
        }
    }

    /// Handle a routed binary response
    pub fn on_response(
        &mut self,
        token: RequestToken,
        result: TransportResult,
        master_version: Option<i64>,
    ) -> Result<ObjectOutcome, ObjectError> {
        if self.pending != Some(token) {
            log::debug!("Dropping object response for stale request {token:?}");
            return Ok(ObjectOutcome::Idle);
        }
        self.pending = None;

        if self.state != ObjectState::WaitingForResponse {
            let state = self.state;
            self.state = ObjectState::Failed;
            return Err(ObjectError::UnexpectedResponse(state));
        }

        let body = match result {
            Ok(ResponseBody::Binary(body)) => body,
            Ok(ResponseBody::Document(_)) => {
                log::error!("Object fetch for {} returned a document body", self.name);
                return self.desync();
            }
            Err(e) => {
                log::warn!("Object fetch for {} failed: {e}", self.name);
                // roll back so the next tick retries
                let fallback = if self.version > 0 {
                    ObjectState::Ready
                } else {
                    ObjectState::Init
                };
                self.transition(fallback)?;
                return Ok(ObjectOutcome::Idle);
            }
        };

        let (header, data) = match unpack(&body) {
            Ok(unpacked) => unpacked,
            Err(e) => {
                log::error!("Object payload for {} is malformed: {e}", self.name);
                return self.desync();
            }
        };

        // an empty reply or a repeated version confirms the held payload
        if header.payload == 0 || (self.version > 0 && header.version == self.version) {
            self.transition(ObjectState::Ready)?;
            return Ok(ObjectOutcome::Unchanged);
        }
        if header.version < self.version {
            log::warn!(
                "Object version for {} went backwards ({} < {}); keeping payload",
                self.name,
                header.version,
                self.version
            );
            self.transition(ObjectState::Ready)?;
            return Ok(ObjectOutcome::Unchanged);
        }

        if self.role == ObjectRole::Master {
            self.adopt(header.version, data);
            self.transition(ObjectState::Ready)?;
            return Ok(ObjectOutcome::MasterDecoded);
        }

        if let Some(master) = self.master.clone() {
            if header.master_version > 0
                && master_version.unwrap_or(0) < header.master_version
            {
                self.stash = Some(StashedPayload {
                    version: header.version,
                    required_master: header.master_version,
                    data,
                });
                self.transition(ObjectState::WaitingForMaster)?;
                return Ok(ObjectOutcome::NeedMaster {
                    master,
                    version: header.master_version,
                });
            }
        }

        self.adopt(header.version, data);
        self.transition(ObjectState::Ready)?;
        Ok(ObjectOutcome::Decoded)
    }

    /// Malformed payload: drop state so a fresh hierarchy load rebuilds it
    fn desync(&mut self) -> Result<ObjectOutcome, ObjectError> {
        self.version = 0;
        self.data = None;
        self.stash = None;
        self.state = match self.role {
            ObjectRole::Master => ObjectState::Ready,
            ObjectRole::Plain => ObjectState::Init,
        };
        self.force = true;
        Ok(ObjectOutcome::Desync)
    }
}
