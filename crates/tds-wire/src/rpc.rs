//! RPC request encoding.
//!
//! An RPC body is ALL_HEADERS, the procedure (a name, or `0xFFFF` followed
//! by a well-known id), two bytes of option flags and the parameters. The
//! request is closed with the `0xFF` batch flag.
//!
//! Parameter values are encoded by the type layer; this module only frames
//! them. [`write_param_header`] produces the name and status prefix every
//! parameter starts with.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::sql_batch::{write_all_headers, ALL_HEADERS_LEN};
use crate::utf16::{utf16_len, write_b_varchar, write_utf16};

const PROC_ID_SWITCH: u16 = 0xFFFF;

/// Batch flag that separates and terminates RPC requests.
pub const BATCH_FLAG: u8 = 0xFF;

/// System procedures addressable by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// `sp_executesql`.
    ExecuteSql = 0x000A,
    /// `sp_prepare`.
    Prepare = 0x000B,
    /// `sp_execute`.
    Execute = 0x000C,
    /// `sp_prepexec`.
    PrepExec = 0x000D,
    /// `sp_unprepare`.
    Unprepare = 0x000F,
}

bitflags! {
    /// RPC option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RpcOptions: u16 {
        /// Recompile the plan.
        const WITH_RECOMPILE = 0x0001;
        /// Suppress COLMETADATA.
        const NO_METADATA = 0x0002;
        /// Reuse metadata from the previous call.
        const REUSE_METADATA = 0x0004;
    }
}

bitflags! {
    /// Per-parameter status byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamStatus: u8 {
        /// Output parameter.
        const BY_REF = 0x01;
        /// Use the parameter default.
        const DEFAULT = 0x02;
    }
}

/// Procedure an RPC invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcTarget {
    /// Well-known system procedure.
    Id(ProcId),
    /// Procedure by name.
    Name(String),
}

/// Write a parameter's `@name` and status byte.
///
/// An empty name is sent as a zero-length name (positional parameter).
pub fn write_param_header(
    dst: &mut impl BufMut,
    name: &str,
    status: ParamStatus,
) -> Result<(), ProtocolError> {
    if name.is_empty() {
        dst.put_u8(0);
    } else if name.starts_with('@') {
        write_b_varchar(dst, name)?;
    } else {
        write_b_varchar(dst, &format!("@{name}"))?;
    }
    dst.put_u8(status.bits());
    Ok(())
}

/// A single RPC request with already-encoded parameters.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    target: RpcTarget,
    options: RpcOptions,
    params: Vec<Bytes>,
}

impl RpcRequest {
    /// Call a system procedure by id.
    #[must_use]
    pub fn by_id(id: ProcId) -> Self {
        Self {
            target: RpcTarget::Id(id),
            options: RpcOptions::empty(),
            params: Vec::new(),
        }
    }

    /// Call a procedure by name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            target: RpcTarget::Name(name.into()),
            options: RpcOptions::empty(),
            params: Vec::new(),
        }
    }

    /// Set option flags.
    #[must_use]
    pub fn with_options(mut self, options: RpcOptions) -> Self {
        self.options = options;
        self
    }

    /// Append an encoded parameter (header, TYPE_INFO and value).
    pub fn push_param(&mut self, param: Bytes) {
        self.params.push(param);
    }

    /// Procedure this request calls.
    #[must_use]
    pub fn target(&self) -> &RpcTarget {
        &self.target
    }

    /// Write ALL_HEADERS, the procedure and the option flags: everything
    /// that precedes the parameters.
    pub fn encode_head(
        &self,
        dst: &mut impl BufMut,
        transaction_descriptor: u64,
    ) -> Result<(), ProtocolError> {
        write_all_headers(dst, transaction_descriptor);
        match &self.target {
            RpcTarget::Id(id) => {
                dst.put_u16_le(PROC_ID_SWITCH);
                dst.put_u16_le(*id as u16);
            }
            RpcTarget::Name(name) => {
                let chars = utf16_len(name);
                let len = u16::try_from(chars)
                    .ok()
                    .filter(|l| *l < PROC_ID_SWITCH)
                    .ok_or(ProtocolError::StringTooLong { prefix: 2, chars })?;
                dst.put_u16_le(len);
                write_utf16(dst, name);
            }
        }
        dst.put_u16_le(self.options.bits());
        Ok(())
    }

    /// Encode the full RPC body.
    pub fn encode(&self, transaction_descriptor: u64) -> Result<Bytes, ProtocolError> {
        let params_len: usize = self.params.iter().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + 16 + params_len);
        self.encode_head(&mut buf, transaction_descriptor)?;
        for param in &self.params {
            buf.put_slice(param);
        }
        buf.put_u8(BATCH_FLAG);
        Ok(buf.freeze())
    }
}
