//! Running a model in a forked child process.
//!
//! The parent keeps an [`SqwProc`] that implements [`SqwModel`] by
//! forwarding every call as a fixed-size [`ProcMsg`] over a message queue.
//! Variable lists and dispersions do not fit in a message; they travel
//! through a shared blob that both sides mapped before the fork.

use super::ipc::{MessageQueue, SharedMemory};
use crate::error::{Result, SqwError};
use crate::model::traits::{Dispersion, ModelCore, SqwModel};
use crate::model::vars::{decode_vars, encode_vars, Variable};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// Records a queue holds before `send` blocks.
pub const QUEUE_LEN: usize = 8;
/// Size of the shared blob.
pub const BLOB_SIZE: usize = 1024 * 1024;
/// Serialised payloads are cut off at this share of the blob.
const BLOB_FILL: f64 = 0.9;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgType {
    Quit = 0,
    Nop = 1,
    Disp = 2,
    Sqw = 3,
    GetVars = 4,
    SetVars = 5,
    IsOk = 6,
    Ready = 7,
}

impl MsgType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Quit,
            1 => Self::Nop,
            2 => Self::Disp,
            3 => Self::Sqw,
            4 => Self::GetVars,
            5 => Self::SetVars,
            6 => Self::IsOk,
            7 => Self::Ready,
            _ => return None,
        })
    }
}

/// One queue record. Laid out without padding so it can be sent as bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcMsg {
    pub params: [f64; 4],
    pub ret: f64,
    /// Bytes of blob payload belonging to this message.
    pub blob_len: u64,
    pub ty: u32,
    pub ok: u32,
}

impl ProcMsg {
    pub fn new(ty: MsgType) -> Self {
        Self {
            ty: ty as u32,
            ..Self::default()
        }
    }

    pub fn with_params(ty: MsgType, params: [f64; 4]) -> Self {
        Self {
            params,
            ..Self::new(ty)
        }
    }

    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_raw(self.ty)
    }
}

/// Encode `vars`, dropping trailing entries once the text would exceed
/// `limit` bytes.
pub fn encode_vars_bounded(vars: &[Variable], limit: usize) -> String {
    let mut total = 0;
    let mut keep = vars.len();
    for (i, v) in vars.iter().enumerate() {
        total += v.name.len() + v.ty.len() + v.value.len() + 3 * 3 + 1;
        if total >= limit {
            tracing::error!("Process buffer limit imminent. Truncating parameter list.");
            keep = i;
            break;
        }
    }
    encode_vars(&vars[..keep])
}

fn blob_limit() -> usize {
    (BLOB_SIZE as f64 * BLOB_FILL) as usize
}

fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// IPC objects and the child, torn down with the last handle.
struct ProcShared {
    name: String,
    child: libc::pid_t,
    /// Child to parent.
    inbox: MessageQueue,
    /// Parent to child.
    outbox: MessageQueue,
    blob: SharedMemory,
    lock: Mutex<()>,
}

impl ProcShared {
    fn create(name: &str) -> Result<(SharedMemory, MessageQueue, MessageQueue)> {
        let size = std::mem::size_of::<ProcMsg>();
        let blob = SharedMemory::create(&format!("/sqw_proc_mem_{}", name), BLOB_SIZE)?;
        let inbox = MessageQueue::create(&format!("/sqw_proc_in_{}", name), QUEUE_LEN, size)?;
        let outbox = MessageQueue::create(&format!("/sqw_proc_out_{}", name), QUEUE_LEN, size)?;
        Ok((blob, inbox, outbox))
    }

    /// Send `msg` with an optional payload and wait for the reply.
    fn request(&self, mut msg: ProcMsg, payload: Option<&str>) -> Result<(ProcMsg, String)> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(payload) = payload {
            msg.blob_len = self.blob.write_str(payload) as u64;
        }
        self.outbox.send(&msg)?;
        let reply: ProcMsg = self.inbox.receive()?;
        let text = if reply.blob_len > 0 {
            self.blob.read_str(reply.blob_len as usize)
        } else {
            String::new()
        };
        Ok((reply, text))
    }
}

impl Drop for ProcShared {
    fn drop(&mut self) {
        tracing::debug!("stopping S(q,w) process {}", self.name);
        if let Err(e) = self.outbox.send(&ProcMsg::new(MsgType::Quit)) {
            tracing::error!("{}", e);
        }
        let mut status = 0;
        unsafe { libc::waitpid(self.child, &mut status, 0) };
        // Queues and blob unlink as the fields drop.
    }
}

/// Child side: build the model, report READY, then serve until QUIT.
fn serve<F>(cfg: &str, ctor: F, inbox: &MessageQueue, outbox: &MessageQueue, blob: &SharedMemory)
where
    F: FnOnce(&str) -> Box<dyn SqwModel>,
{
    let mut model = ctor(cfg);
    let mut ready = ProcMsg::new(MsgType::Ready);
    ready.ok = model.is_ok() as u32;
    if let Err(e) = inbox.send(&ready) {
        tracing::error!("{}", e);
        return;
    }

    loop {
        let msg: ProcMsg = match outbox.receive() {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("{}", e);
                return;
            }
        };
        let [h, k, l, e] = msg.params;
        let mut reply = ProcMsg::new(MsgType::Nop);

        match msg.msg_type() {
            Some(MsgType::Sqw) => {
                reply = ProcMsg::new(MsgType::Sqw);
                reply.ret = model.evaluate(h, k, l, e);
            }
            Some(MsgType::Disp) => {
                reply = ProcMsg::new(MsgType::Disp);
                let wire = model.dispersion(h, k, l).to_wire();
                if wire.len() >= BLOB_SIZE {
                    tracing::error!("Process buffer limit reached. Cannot proceed.");
                } else {
                    reply.blob_len = blob.write_str(&wire) as u64;
                }
            }
            Some(MsgType::GetVars) => {
                reply = ProcMsg::new(MsgType::GetVars);
                let wire = encode_vars_bounded(&model.vars(), blob_limit());
                reply.blob_len = blob.write_str(&wire) as u64;
            }
            Some(MsgType::SetVars) => {
                model.set_vars(&decode_vars(&blob.read_str(msg.blob_len as usize)));
                reply = ProcMsg::new(MsgType::Ready);
                reply.ok = 1;
            }
            Some(MsgType::IsOk) => {
                reply = ProcMsg::new(MsgType::IsOk);
                reply.ok = model.is_ok() as u32;
            }
            Some(MsgType::Quit) => return,
            _ => continue,
        }

        if let Err(e) = inbox.send(&reply) {
            tracing::error!("{}", e);
        }
    }
}

/// A model living in a child process.
#[derive(Clone)]
pub struct SqwProc {
    core: ModelCore,
    shared: Option<Arc<ProcShared>>,
}

impl SqwProc {
    /// Fork a child that builds its model with `ctor(cfg)`.
    ///
    /// Any setup failure yields an invalid proxy without a child.
    pub fn spawn<F>(cfg: &str, ctor: F) -> Self
    where
        F: FnOnce(&str) -> Box<dyn SqwModel>,
    {
        match Self::try_spawn(cfg, ctor) {
            Ok(proc) => proc,
            Err(e) => {
                tracing::error!("{}", e);
                Self {
                    core: ModelCore::invalid(),
                    shared: None,
                }
            }
        }
    }

    fn try_spawn<F>(cfg: &str, ctor: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Box<dyn SqwModel>,
    {
        let name = random_name(8);
        tracing::debug!("creating process memory \"sqw_proc_*_{}\"", name);
        let (blob, inbox, outbox) = ProcShared::create(&name)?;

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(SqwError::Fork(std::io::Error::last_os_error().to_string()));
        }
        if pid == 0 {
            let served = catch_unwind(AssertUnwindSafe(|| serve(cfg, ctor, &inbox, &outbox, &blob)));
            if served.is_err() {
                let mut failed = ProcMsg::new(MsgType::Ready);
                failed.ok = 0;
                let _ = inbox.send(&failed);
            }
            // Skip destructors: the parent owns the IPC names.
            unsafe { libc::_exit(if served.is_ok() { 0 } else { 1 }) };
        }

        let shared = ProcShared {
            name,
            child: pid,
            inbox,
            outbox,
            blob,
            lock: Mutex::new(()),
        };

        tracing::debug!("waiting for client to become ready...");
        let ready: ProcMsg = shared.inbox.receive()?;
        let ok = ready.msg_type() == Some(MsgType::Ready) && ready.ok != 0;
        if ok {
            tracing::debug!("client is ready");
        } else {
            tracing::error!("client reports failure");
        }

        Ok(Self {
            core: ModelCore {
                ok,
                fit_vars: Vec::new(),
            },
            shared: Some(Arc::new(shared)),
        })
    }

    /// Random part of the IPC object names.
    pub fn name(&self) -> Option<&str> {
        self.shared.as_deref().map(|s| s.name.as_str())
    }

    pub fn child_pid(&self) -> Option<i32> {
        self.shared.as_deref().map(|s| s.child)
    }

    fn request(&self, msg: ProcMsg, payload: Option<&str>) -> Option<(ProcMsg, String)> {
        if !self.core.ok {
            return None;
        }
        let shared = self.shared.as_deref()?;
        match shared.request(msg, payload) {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::error!("{}", e);
                None
            }
        }
    }
}

impl SqwModel for SqwProc {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        self.request(ProcMsg::with_params(MsgType::Sqw, [h, k, l, e]), None)
            .map_or(0.0, |(reply, _)| reply.ret)
    }

    fn dispersion(&self, h: f64, k: f64, l: f64) -> Dispersion {
        self.request(ProcMsg::with_params(MsgType::Disp, [h, k, l, 0.0]), None)
            .map(|(_, blob)| Dispersion::from_wire(&blob))
            .unwrap_or_default()
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn is_ok(&self) -> bool {
        self.request(ProcMsg::new(MsgType::IsOk), None)
            .is_some_and(|(reply, _)| reply.ok != 0)
    }

    fn vars(&self) -> Vec<Variable> {
        self.request(ProcMsg::new(MsgType::GetVars), None)
            .map(|(_, blob)| decode_vars(&blob))
            .unwrap_or_default()
    }

    fn set_vars(&mut self, vars: &[Variable]) {
        let wire = encode_vars_bounded(vars, blob_limit());
        self.request(ProcMsg::new(MsgType::SetVars), Some(&wire));
    }

    fn shallow_copy(&self) -> Box<dyn SqwModel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_has_no_padding() {
        assert_eq!(std::mem::size_of::<ProcMsg>(), 6 * 8 + 2 * 4);
        assert_eq!(MsgType::from_raw(MsgType::SetVars as u32), Some(MsgType::SetVars));
        assert_eq!(MsgType::from_raw(42), None);
    }

    #[test]
    fn test_bounded_encoding_truncates() {
        let vars: Vec<_> = (0..10).map(|i| Variable::new(format!("v{}", i), "real", "1")).collect();
        assert_eq!(decode_vars(&encode_vars_bounded(&vars, 1000)).len(), 10);
        // Each entry accounts for 2 + 4 + 1 + 10 bytes.
        assert_eq!(decode_vars(&encode_vars_bounded(&vars, 40)).len(), 2);
    }

    #[test]
    fn test_random_name() {
        let a = random_name(8);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
