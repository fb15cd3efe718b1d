use ark_serialize::SerializationError;
use bbs_plus::prelude::BBSPlusError;
use proof_system::prelude::ProofSystemError;
use vb_accumulator::error::VBAccumulatorError;

#[derive(Debug)]
pub enum CredentialError {
    /// A presentation was requested or built without any attribute names
    EmptyRequest,
    /// Lists that must be of the same length are not. Given as (expected, found)
    UnequalLengths(usize, usize),
    /// The claim encodes to more attributes than the key can sign. Given as (attributes, capacity)
    TooManyAttributes(usize, usize),
    /// Requested key capacity is above the supported maximum
    CapacityTooLarge(u32),
    AttributeNotFound(String),
    /// Index 0 belongs to the claimer secret, and indices beyond the key capacity are never attributes
    InvalidAttributeIndex(usize),
    /// Binary attribute encoding does not start with `0xFF`
    MissingSentinelByte,
    /// A length prefix points past the end of the binary encoding
    TruncatedAttribute,
    /// Name or typename of a binary encoding is not UTF-8
    NonUtf8AttributeField,
    /// Bytes remain after the last field of a binary encoding
    TrailingBytes(usize),
    /// Attribute payload cannot be decoded as its typename. Given as (name, typename)
    MalformedAttributeValue(String, String),
    /// Reconstruction found a non-map value where the path needs a map
    PathCollision(String),
    /// Reconstruction would write the same path twice
    DuplicatePath(String),
    /// Claim leaf that has no attribute encoding, like JSON `null`
    UnsupportedClaimValue(String),
    ClaimNotAnObject,
    InvalidCommitmentProof,
    InvalidSignature,
    InvalidAccumulatorSignature,
    InvalidWitness,
    /// The witness element was removed from the accumulator
    WitnessRevoked,
    /// Events between the witness and the update are missing. Given as (witness index, first event index)
    WitnessTooOld(u64, u64),
    /// Event at the given index does not follow its predecessor
    BrokenEventChain(u64),
    /// Replaying the events did not land on the signed accumulator
    AccumulatorMismatch,
    NothingToRevoke,
    KeyExpired,
    /// Credential at the given position of a combined presentation has a different claimer secret
    SecretMismatch(usize),
    InvalidMnemonic(String),
    Json(String),
    BBSPlus(BBSPlusError),
    VBAccumulator(VBAccumulatorError),
    ProofSystem(ProofSystemError),
    Serialization(SerializationError),
}

impl From<BBSPlusError> for CredentialError {
    fn from(e: BBSPlusError) -> Self {
        Self::BBSPlus(e)
    }
}

impl From<VBAccumulatorError> for CredentialError {
    fn from(e: VBAccumulatorError) -> Self {
        Self::VBAccumulator(e)
    }
}

impl From<ProofSystemError> for CredentialError {
    fn from(e: ProofSystemError) -> Self {
        Self::ProofSystem(e)
    }
}

impl From<SerializationError> for CredentialError {
    fn from(e: SerializationError) -> Self {
        Self::Serialization(e)
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
