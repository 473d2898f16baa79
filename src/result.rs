//! Operation results and the two error families of §7: `LdapError` for
//! anything that crosses the wire (or fails to), `LocalError` for the
//! schema-checked and account-entry validation machinery.

use std::fmt;
use std::io;

/// RFC 4511 result codes, plus the client-local pseudo-codes used by the
/// connection manager for transport failures (§4.4, §7). The pseudo-codes
/// follow the convention of the reference LDAP client libraries: negative,
/// never sent on the wire.
#[derive(Clone, Copy, Debug)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    CompareFalse,
    CompareTrue,
    AuthMethodNotSupported,
    NoSuchAttribute,
    UndefinedAttributeType,
    ConstraintViolation,
    AttributeOrValueExists,
    InvalidAttributeSyntax,
    NoSuchObject,
    InvalidDnSyntax,
    InappropriateAuthentication,
    InvalidCredentials,
    InsufficientAccessRights,
    Busy,
    Unavailable,
    UnwillingToPerform,
    NamingViolation,
    ObjectClassViolation,
    NotAllowedOnNonLeaf,
    NotAllowedOnRdn,
    EntryAlreadyExists,
    Other(u32),
    /// Transport could not be established to any endpoint in the pool.
    ServerDown,
    /// Connect or I/O operation exceeded its timeout.
    Timeout,
    /// The transport refused or reset the connection attempt.
    ConnectError,
    /// A BER response could not be decoded.
    DecodingError,
    /// A local precondition failed before any PDU was sent.
    LocalError,
}

impl ResultCode {
    pub fn from_wire(code: u32) -> ResultCode {
        use ResultCode::*;
        match code {
            0 => Success,
            1 => OperationsError,
            2 => ProtocolError,
            3 => TimeLimitExceeded,
            4 => SizeLimitExceeded,
            5 => CompareFalse,
            6 => CompareTrue,
            7 => AuthMethodNotSupported,
            16 => NoSuchAttribute,
            17 => UndefinedAttributeType,
            19 => ConstraintViolation,
            20 => AttributeOrValueExists,
            21 => InvalidAttributeSyntax,
            32 => NoSuchObject,
            34 => InvalidDnSyntax,
            48 => InappropriateAuthentication,
            49 => InvalidCredentials,
            50 => InsufficientAccessRights,
            51 => Busy,
            52 => Unavailable,
            53 => UnwillingToPerform,
            64 => NamingViolation,
            65 => ObjectClassViolation,
            66 => NotAllowedOnNonLeaf,
            67 => NotAllowedOnRdn,
            68 => EntryAlreadyExists,
            n => Other(n),
        }
    }

    /// True for the three transport-family codes the connection manager
    /// retries exactly once (§4.4, §7); never true for a server result code.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResultCode::ServerDown | ResultCode::Timeout | ResultCode::ConnectError)
    }
}

impl PartialEq for ResultCode {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
impl Eq for ResultCode {}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ResultCode::*;
        let name = match self {
            Success => "success",
            OperationsError => "operationsError",
            ProtocolError => "protocolError",
            TimeLimitExceeded => "timeLimitExceeded",
            SizeLimitExceeded => "sizeLimitExceeded",
            CompareFalse => "compareFalse",
            CompareTrue => "compareTrue",
            AuthMethodNotSupported => "authMethodNotSupported",
            NoSuchAttribute => "noSuchAttribute",
            UndefinedAttributeType => "undefinedAttributeType",
            ConstraintViolation => "constraintViolation",
            AttributeOrValueExists => "attributeOrValueExists",
            InvalidAttributeSyntax => "invalidAttributeSyntax",
            NoSuchObject => "noSuchObject",
            InvalidDnSyntax => "invalidDNSyntax",
            InappropriateAuthentication => "inappropriateAuthentication",
            InvalidCredentials => "invalidCredentials",
            InsufficientAccessRights => "insufficientAccessRights",
            Busy => "busy",
            Unavailable => "unavailable",
            UnwillingToPerform => "unwillingToPerform",
            NamingViolation => "namingViolation",
            ObjectClassViolation => "objectClassViolation",
            NotAllowedOnNonLeaf => "notAllowedOnNonLeaf",
            NotAllowedOnRdn => "notAllowedOnRDN",
            EntryAlreadyExists => "entryAlreadyExists",
            Other(_) => "other",
            ServerDown => "serverDown",
            Timeout => "timeout",
            ConnectError => "connectError",
            DecodingError => "decodingError",
            LocalError => "localError",
        };
        write!(f, "{}", name)
    }
}

/// Common components of an LDAP operation result (RFC 4511 `LDAPResult`).
#[derive(Clone, Debug)]
pub struct LdapResult {
    pub rc: ResultCode,
    pub matched_dn: String,
    pub message: String,
}

impl LdapResult {
    pub fn success(self) -> Result<Self, LdapError> {
        if self.rc == ResultCode::Success {
            Ok(self)
        } else {
            Err(LdapError::Failure(self))
        }
    }
}

impl fmt::Display for LdapResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (matched {:?}): {}", self.rc, self.matched_dn, self.message)
    }
}

/// Wrapper for a Compare result: the two non-error outcomes are themselves
/// result codes, so neither plain `success()` nor a boolean alone fits.
#[derive(Clone, Debug)]
pub struct CompareResult(pub LdapResult);

impl CompareResult {
    pub fn equal(self) -> Result<bool, LdapError> {
        match self.0.rc {
            ResultCode::CompareFalse => Ok(false),
            ResultCode::CompareTrue => Ok(true),
            _ => Err(LdapError::Failure(self.0)),
        }
    }
}

/// The transport/server-facing error family of §7.
#[derive(Debug, thiserror::Error)]
pub enum LdapError {
    #[error("{0}")]
    Failure(LdapResult),
    #[error("I/O error: {0}")]
    Io(io::Error),
    #[error("no usable endpoint in the URL pool")]
    PoolExhausted,
    #[error("a streaming search is already in progress on this connection")]
    Busy,
    #[error("protocol version {0} does not support this operation")]
    UnsupportedVersion(u8),
    #[error("invalid LDAP URL: {0}")]
    Url(String),
}

/// `protocol::read_message` reports malformed/undecodable responses as an
/// `io::Error` of kind `InvalidData`: those aren't transport failures and
/// must not be retried like one (§7 distinguishes `DECODING_ERROR` from the
/// transport-family codes), so they're routed to `decoding_error` here
/// rather than wrapped as a bare `Io`.
impl From<io::Error> for LdapError {
    fn from(e: io::Error) -> LdapError {
        if e.kind() == io::ErrorKind::InvalidData {
            LdapError::decoding_error(e.to_string())
        } else {
            LdapError::Io(e)
        }
    }
}

impl LdapError {
    pub fn is_transient(&self) -> bool {
        match self {
            LdapError::Failure(r) => r.rc.is_transient(),
            LdapError::Io(_) => true,
            _ => false,
        }
    }

    pub fn server_down(message: impl Into<String>) -> LdapError {
        LdapError::Failure(LdapResult { rc: ResultCode::ServerDown, matched_dn: String::new(), message: message.into() })
    }

    pub fn connect_error(message: impl Into<String>) -> LdapError {
        LdapError::Failure(LdapResult { rc: ResultCode::ConnectError, matched_dn: String::new(), message: message.into() })
    }

    pub fn decoding_error(message: impl Into<String>) -> LdapError {
        LdapError::Failure(LdapResult { rc: ResultCode::DecodingError, matched_dn: String::new(), message: message.into() })
    }

    pub fn operations_error(message: impl Into<String>) -> LdapError {
        LdapError::Failure(LdapResult { rc: ResultCode::OperationsError, matched_dn: String::new(), message: message.into() })
    }
}

/// Error raised by the generator invoked for a single attribute (§4.3, §7).
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("required attribute {0} has no value")]
    MissingRequired(String),
    #[error("generator error: {0}")]
    GeneratorError(String),
}

/// The schema-checked / account-entry local domain error family of §7.
#[derive(Debug, thiserror::Error)]
pub enum LocalError {
    #[error("unknown object class: {0}")]
    InvalidObjectClass(String),
    #[error("attribute not permitted by the object-class cover: {0}")]
    InvalidAttribute(String),
    #[error("attribute {0} is single-valued")]
    SingleValue(String),
    #[error("no objectClass attribute present")]
    ObjectclassIsRequired,
    #[error("no generator registered for attribute {0}")]
    NoGenerator(String),
    #[error("no service registered: {0}")]
    NoService(String),
    #[error("generation failed for attribute {attr}: {source}")]
    GenerationFailed { attr: String, source: GenerationError },
    #[error("service {service} depends on unregistered service {dep}")]
    ServiceDepUnsatisfiable { service: String, dep: String },
    #[error("generator for service {service} cannot satisfy required attribute {attr}")]
    GeneratorDepUnsatisfiable { service: String, attr: String },
    #[error("cannot topologically sort generator dependencies, remaining: {0:?}")]
    CannotSortDependancies(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_not_transient() {
        let io_err = io::Error::new(io::ErrorKind::InvalidData, "BER decoding error");
        let err: LdapError = io_err.into();
        assert!(matches!(err, LdapError::Failure(LdapResult { rc: ResultCode::DecodingError, .. })));
        assert!(!err.is_transient());
    }

    #[test]
    fn connection_reset_is_transient() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err: LdapError = io_err.into();
        assert!(matches!(err, LdapError::Io(_)));
        assert!(err.is_transient());
    }
}
