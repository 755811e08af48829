//! Ledger records: the atomic unit of the registry.
//!
//! A [`LedgerRecord`] is an immutable, hash-chained, operator-attested event.
//! Registrations, revocations and share grants are all records; state such as
//! "the active entry for a CID" is derived by replaying them in order.

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::{decode_canonical, encode_canonical, MapBuilder, MapReader};
use crate::cid::Cid;
use crate::crypto::{Blake3Hash, Identity, Keypair, Signature};
use crate::error::CoreError;

/// Domain separation tag for record hashes.
pub const RECORD_DOMAIN: &[u8] = b"docchain-record-v1:";

/// Whether a document may be read by anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

/// Free-form document metadata stored alongside a registration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    /// Payload size in bytes.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub visibility: Visibility,
    /// Application-defined fields (file name, issuing office, ...).
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    fn to_value(&self) -> Value {
        let extra = self
            .extra
            .iter()
            .map(|(k, v)| (Value::Text(k.clone()), Value::Text(v.clone())))
            .collect();
        MapBuilder::new()
            .field(0, Value::Text(self.title.clone()))
            .field(1, Value::Text(self.description.clone()))
            .field(2, Value::Text(self.mime_type.clone()))
            .field(3, Value::Integer(self.size.into()))
            .field(4, Value::Integer((self.is_public() as u64).into()))
            .field(5, Value::Map(extra))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, CoreError> {
        let map = MapReader::new(value, "metadata")?;
        let visibility = match map.u64(4)? {
            0 => Visibility::Private,
            1 => Visibility::Public,
            other => {
                return Err(CoreError::MalformedRecord(format!(
                    "unknown visibility {other}"
                )))
            }
        };
        let mut extra = BTreeMap::new();
        match map.value(5)? {
            Value::Map(entries) => {
                for (k, v) in entries {
                    match (k, v) {
                        (Value::Text(k), Value::Text(v)) => {
                            extra.insert(k.clone(), v.clone());
                        }
                        _ => {
                            return Err(CoreError::MalformedRecord(
                                "metadata extra must map text to text".into(),
                            ))
                        }
                    }
                }
            }
            _ => return Err(CoreError::MalformedRecord("metadata extra must be a map".into())),
        }
        Ok(Self {
            title: map.text(0)?.to_owned(),
            description: map.text(1)?.to_owned(),
            mime_type: map.text(2)?.to_owned(),
            size: map.u64(3)?,
            visibility,
            extra,
        })
    }
}

/// Lifecycle status of a registry entry or share grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Revoked,
}

/// A registry entry, as derived from a `Register` or `Revoke` record.
///
/// CID, owner and timestamp never change once appended. Revocation appends
/// a new entry with status [`EntryStatus::Revoked`] pointing at the
/// registration it invalidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Ledger sequence number of the record this entry came from.
    pub seq: u64,
    pub cid: Cid,
    pub owner: Identity,
    /// Ledger-assigned timestamp (Unix milliseconds).
    pub timestamp: i64,
    pub metadata: Metadata,
    pub status: EntryStatus,
    /// For revocations, the sequence number of the revoked registration.
    pub revokes: Option<u64>,
}

impl RegistryEntry {
    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }
}

/// A read capability on a CID, granted by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub cid: Cid,
    pub grantor: Identity,
    pub grantee: Identity,
    /// Ledger-assigned timestamp of the grant (Unix milliseconds).
    pub timestamp: i64,
    /// Expiry (Unix milliseconds); the grant is dead once `now > expires_at`.
    pub expires_at: Option<i64>,
    pub status: EntryStatus,
}

impl ShareGrant {
    /// Whether the grant has passed its expiry at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expiry) if now > expiry)
    }

    /// Whether the grant confers access at `now`.
    pub fn is_live(&self, now: i64) -> bool {
        self.status == EntryStatus::Active && !self.is_expired(now)
    }
}

/// The kind of a ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordKind {
    Register = 1,
    Revoke = 2,
    Grant = 3,
    Ungrant = 4,
}

impl RecordKind {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Register),
            2 => Some(Self::Revoke),
            3 => Some(Self::Grant),
            4 => Some(Self::Ungrant),
            _ => None,
        }
    }
}

/// The operation a record carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RecordBody {
    Register {
        cid: Cid,
        owner: Identity,
        metadata: Metadata,
    },
    Revoke {
        cid: Cid,
        owner: Identity,
        target_seq: u64,
    },
    Grant {
        cid: Cid,
        grantor: Identity,
        grantee: Identity,
        expires_at: Option<i64>,
    },
    Ungrant {
        cid: Cid,
        grantor: Identity,
        grantee: Identity,
    },
}

impl RecordBody {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordBody::Register { .. } => RecordKind::Register,
            RecordBody::Revoke { .. } => RecordKind::Revoke,
            RecordBody::Grant { .. } => RecordKind::Grant,
            RecordBody::Ungrant { .. } => RecordKind::Ungrant,
        }
    }

    /// The CID this record is about.
    pub fn cid(&self) -> &Cid {
        match self {
            RecordBody::Register { cid, .. }
            | RecordBody::Revoke { cid, .. }
            | RecordBody::Grant { cid, .. }
            | RecordBody::Ungrant { cid, .. } => cid,
        }
    }

    /// The identity that issued the operation.
    pub fn issuer(&self) -> &Identity {
        match self {
            RecordBody::Register { owner, .. } | RecordBody::Revoke { owner, .. } => owner,
            RecordBody::Grant { grantor, .. } | RecordBody::Ungrant { grantor, .. } => grantor,
        }
    }

    fn to_value(&self) -> Value {
        let builder = MapBuilder::new()
            .field(0, Value::Integer(self.kind().to_u8().into()))
            .field(1, Value::Bytes(self.cid().to_bytes().to_vec()))
            .field(2, Value::Bytes(self.issuer().as_bytes().to_vec()));
        match self {
            RecordBody::Register { metadata, .. } => builder.field(3, metadata.to_value()),
            RecordBody::Revoke { target_seq, .. } => {
                builder.field(3, Value::Integer((*target_seq).into()))
            }
            RecordBody::Grant {
                grantee,
                expires_at,
                ..
            } => builder
                .field(3, Value::Bytes(grantee.as_bytes().to_vec()))
                .field(
                    4,
                    expires_at.map_or(Value::Null, |e| Value::Integer(e.into())),
                ),
            RecordBody::Ungrant { grantee, .. } => {
                builder.field(3, Value::Bytes(grantee.as_bytes().to_vec()))
            }
        }
        .build()
    }

    fn from_value(value: &Value) -> Result<Self, CoreError> {
        let map = MapReader::new(value, "record body")?;
        let kind = u8::try_from(map.u64(0)?)
            .ok()
            .and_then(RecordKind::from_u8)
            .ok_or_else(|| CoreError::MalformedRecord("unknown record kind".into()))?;
        let cid = Cid::from_slice(map.bytes(1)?)?;
        let issuer = Identity::from_bytes(map.bytes32(2)?);

        Ok(match kind {
            RecordKind::Register => RecordBody::Register {
                cid,
                owner: issuer,
                metadata: Metadata::from_value(map.value(3)?)?,
            },
            RecordKind::Revoke => RecordBody::Revoke {
                cid,
                owner: issuer,
                target_seq: map.u64(3)?,
            },
            RecordKind::Grant => RecordBody::Grant {
                cid,
                grantor: issuer,
                grantee: Identity::from_bytes(map.bytes32(3)?),
                expires_at: map.opt_i64(4)?,
            },
            RecordKind::Ungrant => RecordBody::Ungrant {
                cid,
                grantor: issuer,
                grantee: Identity::from_bytes(map.bytes32(3)?),
            },
        })
    }
}

/// Field keys of an encoded record.
mod keys {
    pub const SEQ: u64 = 0;
    pub const PREV_HASH: u64 = 1;
    pub const TIMESTAMP: u64 = 2;
    pub const BODY: u64 = 3;
    pub const ATTESTOR: u64 = 4;
    pub const SIGNATURE: u64 = 5;
}

/// An attested, hash-chained ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Position in the log, starting at 1.
    pub seq: u64,
    /// Hash of the previous record ([`Blake3Hash::ZERO`] for the first).
    pub prev_hash: Blake3Hash,
    /// Ledger-assigned timestamp (Unix milliseconds), non-decreasing along the chain.
    pub timestamp: i64,
    pub body: RecordBody,
    /// The ledger operator key that attested the record.
    pub attestor: Identity,
    /// Signature by `attestor` over [`LedgerRecord::hash`].
    pub signature: Signature,
}

impl LedgerRecord {
    /// Build and attest a record.
    pub fn attest(
        seq: u64,
        prev_hash: Blake3Hash,
        timestamp: i64,
        body: RecordBody,
        operator: &Keypair,
    ) -> Self {
        let attestor = operator.identity();
        let hash = compute_record_hash(seq, &prev_hash, timestamp, &body, &attestor);
        let signature = operator.sign(hash.as_bytes());
        Self {
            seq,
            prev_hash,
            timestamp,
            body,
            attestor,
            signature,
        }
    }

    /// The record hash: what the next record links to and the attestor signs.
    pub fn hash(&self) -> Blake3Hash {
        compute_record_hash(
            self.seq,
            &self.prev_hash,
            self.timestamp,
            &self.body,
            &self.attestor,
        )
    }

    /// Check the attestation signature.
    pub fn verify_attestation(&self) -> Result<(), CoreError> {
        self.attestor
            .verify(self.hash().as_bytes(), &self.signature)
    }

    /// Encode to canonical bytes, signature included.
    pub fn encode(&self) -> Vec<u8> {
        let value = unsigned_builder(
            self.seq,
            &self.prev_hash,
            self.timestamp,
            &self.body,
            &self.attestor,
        )
        .field(keys::SIGNATURE, Value::Bytes(self.signature.as_bytes().to_vec()))
        .build();
        encode_canonical(&value)
    }

    /// Decode from canonical bytes. Does not check the signature.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let value = decode_canonical(bytes)?;
        let map = MapReader::new(&value, "ledger record")?;

        let seq = map.u64(keys::SEQ)?;
        if seq == 0 {
            return Err(CoreError::MalformedRecord("sequence numbers start at 1".into()));
        }
        let signature: [u8; 64] = map
            .bytes(keys::SIGNATURE)?
            .try_into()
            .map_err(|_| CoreError::MalformedRecord("signature must be 64 bytes".into()))?;

        Ok(Self {
            seq,
            prev_hash: Blake3Hash::from_bytes(map.bytes32(keys::PREV_HASH)?),
            timestamp: map.i64(keys::TIMESTAMP)?,
            body: RecordBody::from_value(map.value(keys::BODY)?)?,
            attestor: Identity::from_bytes(map.bytes32(keys::ATTESTOR)?),
            signature: Signature::from_bytes(signature),
        })
    }

    /// The chain head this record establishes.
    pub fn head(&self) -> ChainHead {
        ChainHead {
            seq: self.seq,
            hash: self.hash(),
            timestamp: self.timestamp,
        }
    }
}

fn unsigned_builder(
    seq: u64,
    prev_hash: &Blake3Hash,
    timestamp: i64,
    body: &RecordBody,
    attestor: &Identity,
) -> MapBuilder {
    MapBuilder::new()
        .field(keys::SEQ, Value::Integer(seq.into()))
        .field(keys::PREV_HASH, Value::Bytes(prev_hash.as_bytes().to_vec()))
        .field(keys::TIMESTAMP, Value::Integer(timestamp.into()))
        .field(keys::BODY, body.to_value())
        .field(keys::ATTESTOR, Value::Bytes(attestor.as_bytes().to_vec()))
}

fn compute_record_hash(
    seq: u64,
    prev_hash: &Blake3Hash,
    timestamp: i64,
    body: &RecordBody,
    attestor: &Identity,
) -> Blake3Hash {
    let bytes = encode_canonical(&unsigned_builder(seq, prev_hash, timestamp, body, attestor).build());
    Blake3Hash::hash_with_domain(RECORD_DOMAIN, &bytes)
}

/// The tip of a ledger chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub seq: u64,
    pub hash: Blake3Hash,
    pub timestamp: i64,
}
