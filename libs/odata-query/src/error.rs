/// Unified error type for query construction and URI materialization.
///
/// Every variant is raised before any request leaves the process. Messages
/// always name the offending type, property, parameter or operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Schema resolution
    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("type '{type_name}' has no property '{property}'")]
    UnknownProperty { type_name: String, property: String },

    #[error("base type '{base}' of '{type_name}' could not be resolved")]
    UnknownBaseType { type_name: String, base: String },

    #[error("property '{property}' is declared on both '{type_name}' and its base type '{base}'")]
    DuplicateProperty {
        type_name: String,
        base: String,
        property: String,
    },

    #[error("type '{type_name}' does not define any key properties")]
    NoKey { type_name: String },

    #[error("missing key property '{property}' for type '{type_name}'")]
    MissingKeyProperty { type_name: String, property: String },

    #[error("key property '{property}' is not part of the key of '{type_name}'")]
    UnexpectedKeyProperty { type_name: String, property: String },

    #[error("cannot cast '{type_name}' to '{target}': no derived type with that name")]
    UnknownCast { type_name: String, target: String },

    #[error("no entity set is addressed before {0}")]
    MissingEntitySet(String),

    #[error("function '{function}' is not bound to '{type_name}'")]
    UnknownFunction { type_name: String, function: String },

    // Structural misuse
    #[error("Multiple {clause} clauses detected. {hint}")]
    MultipleClauses { clause: String, hint: String },

    #[error("cannot add {part} after a query has been added")]
    PartAfterQuery { part: String },

    #[error("cannot add a key to '{type_name}': {reason}")]
    KeyNotAllowed { type_name: String, reason: String },

    #[error("cannot access property '{property}' of '{type_name}': {reason}")]
    PropertyNotAllowed {
        type_name: String,
        property: String,
        reason: String,
    },

    #[error("uri must start with an entity set or container name, found {0}")]
    MissingUriRoot(String),

    #[error("{function} expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("argument '{parameter}' does not match its declared rewrite in signature {signature}")]
    RewriteArgMismatch { parameter: String, signature: String },

    #[error("rewrite argument '{parameter}' was not eliminated before evaluating {signature}")]
    UnresolvedRewrite { parameter: String, signature: String },

    #[error("duplicate argument '{parameter}' in signature {signature}")]
    DuplicateArgument { parameter: String, signature: String },

    #[error("signature container '{expected}' cannot hold a signature named '{actual}'")]
    SignatureNameMismatch { expected: String, actual: String },

    #[error("return type of '{0}' is ambiguous; add an output type to resolve the overload")]
    PolymorphicReturnType(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // Unsupported shapes
    #[error("collections of collections are not supported ({0})")]
    NestedCollection(String),

    #[error("cannot traverse '{type_name}': {reason}")]
    CannotTraverse { type_name: String, reason: String },

    #[error("mapper for '{type_name}' cannot be applied to argument '{parameter}': {reason}")]
    UnsupportedMapperShape {
        type_name: String,
        parameter: String,
        reason: String,
    },

    // Serialization
    #[error("cannot serialize {value} as '{type_name}'")]
    Serialize { value: String, type_name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
