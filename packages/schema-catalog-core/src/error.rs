//! Schema catalog error types.

use thiserror::Error;

/// Broad classification of a [`SchemaError`], used to decide how a failed
/// DDL operation is unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any durable mutation; the template is discarded
    Validation,
    /// Raised by the lock/fetch layer before any state is touched
    Authorization,
    /// Deadlock or unilateral abort; the transaction is already unwound
    Lock,
    /// Storage or structural failure; requires savepoint rollback
    Storage,
    /// Existing data violates a constraint being added
    ConstraintViolation,
}

/// Schema catalog operation errors.
#[derive(Error, Debug, Clone)]
pub enum SchemaError {
    /// Class not found
    #[error("Class '{class}' not found")]
    ClassNotFound { class: String },

    /// Class already exists
    #[error("Class '{0}' already exists")]
    ClassAlreadyExists(String),

    /// Identifier is empty, too long or contains illegal characters
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Operation not supported on this kind of class
    #[error("Operation '{operation}' is not allowed on class '{class}'")]
    InvalidClassType {
        class: String,
        operation: &'static str,
    },

    /// Attribute not found
    #[error("Attribute '{attribute}' not found in class '{class}'")]
    AttributeNotFound { class: String, attribute: String },

    /// Method not found
    #[error("Method '{method}' not found in class '{class}'")]
    MethodNotFound { class: String, method: String },

    /// Inherited components can only be changed in their defining class
    #[error("Attribute '{attribute}' of '{class}' is inherited from '{origin}'")]
    InheritedAttribute {
        class: String,
        attribute: String,
        origin: String,
    },

    /// Name already used by another component
    #[error("A component named '{name}' already exists in class '{class}'")]
    ComponentExists { class: String, name: String },

    /// Attribute is part of the primary key
    #[error("Attribute '{attribute}' is a member of the primary key of '{class}'")]
    AttributePrimaryKeyMember { class: String, attribute: String },

    /// Attribute participates in a constraint
    #[error("Attribute '{attribute}' participates in constraint '{constraint}' of '{class}'")]
    AttributeInConstraint {
        class: String,
        attribute: String,
        constraint: String,
    },

    /// Superclass already in the inheritance list
    #[error("'{superclass}' is already a superclass of '{class}'")]
    SuperClassExists { class: String, superclass: String },

    /// Superclass not in the inheritance list
    #[error("'{superclass}' is not a superclass of '{class}'")]
    SuperNotFound { class: String, superclass: String },

    /// Adding the superclass would create a cycle
    #[error("Adding '{superclass}' as a superclass of '{class}' would create a cycle")]
    SuperCausesCycle { class: String, superclass: String },

    /// Superclass kind does not match (class under view or the reverse)
    #[error("'{superclass}' cannot be a superclass of '{class}'")]
    IncompatibleSuperClass { class: String, superclass: String },

    /// Attribute and method share a name
    #[error("Attribute and method '{name}' from '{first}' and '{second}' are incompatible")]
    IncompatibleComponents {
        name: String,
        first: String,
        second: String,
    },

    /// Alias name used more than once
    #[error("Alias name '{alias}' is used more than once")]
    MultipleAlias { alias: String },

    /// Alias collides with a local definition
    #[error("Cannot use '{alias}' as an alias for '{name}', a local component with that name exists")]
    AliasComponentExists { alias: String, name: String },

    /// Alias collides with an inherited component
    #[error("Cannot use '{alias}' as an alias for '{name}' of '{source_class}', a component with that name is inherited from '{other}'")]
    AliasComponentInherited {
        alias: String,
        name: String,
        source_class: String,
        other: String,
    },

    /// Two inherited components with unrelated domains
    #[error("Domains of '{name}' inherited from '{first}' and '{second}' are incompatible in '{class}'")]
    IncompatibleDomains {
        name: String,
        first: String,
        second: String,
        class: String,
    },

    /// Local definition cannot shadow the inherited one
    #[error("Local '{name}' of '{class}' cannot shadow the definition inherited from '{source_class}'")]
    IncompatibleShadow {
        name: String,
        source_class: String,
        class: String,
    },

    /// A requested resolution would be overridden by a more specific domain
    #[error("Cannot override resolution on '{name}' of '{requested}' with '{other}' in '{class}'")]
    ResolutionOverride {
        name: String,
        requested: String,
        other: String,
        class: String,
    },

    /// Unresolved conflict between inherited components
    #[error("Conflict on '{name}' between '{first}' and '{second}' requires a resolution")]
    AttributeNameConflict {
        name: String,
        first: String,
        second: String,
    },

    /// Aliased component has nothing to replace it
    #[error("No substitute found for aliased '{name}' of '{source_class}' in '{class}'")]
    MissingAliasSubstitute {
        name: String,
        source_class: String,
        class: String,
    },

    /// Local substitute incompatible with the aliased component
    #[error("Local '{name}' of '{class}' is incompatible with the aliased component of '{source_class}'")]
    IncompatibleAliasLocalSub {
        name: String,
        source_class: String,
        class: String,
    },

    /// Inherited substitute incompatible with the aliased component
    #[error("'{name}' of '{substitute}' is incompatible with the aliased component of '{source_class}' in '{class}'")]
    IncompatibleAliasSubstitute {
        name: String,
        substitute: String,
        source_class: String,
        class: String,
    },

    /// Substitute less specific than the aliased component
    #[error("'{name}' of '{substitute}' is less specific than the aliased component of '{source_class}' in '{class}'")]
    LessSpecificAliasSubstitute {
        name: String,
        source_class: String,
        substitute: String,
        class: String,
    },

    /// Resolution names a component the superclass does not have
    #[error("Invalid resolution in '{class}': '{name}' is not a component of '{superclass}'")]
    InvalidResolution {
        class: String,
        name: String,
        superclass: String,
    },

    /// Resolution alias collides with a local definition
    #[error("Resolution alias '{alias}' in '{class}' collides with a local component")]
    ResolutionComponentExists { class: String, alias: String },

    /// Resolution not found
    #[error("No resolution for '{name}' from '{superclass}' in '{class}'")]
    ResolutionNotFound {
        class: String,
        name: String,
        superclass: String,
    },

    /// Class lattice cycle found while locking subclasses
    #[error("Cycle detected in the hierarchy of '{class}' through '{through}'")]
    CycleDetected { class: String, through: String },

    /// Constraint name already used
    #[error("Constraint '{constraint}' already exists in class '{class}'")]
    ConstraintExists { class: String, constraint: String },

    /// Constraint not found
    #[error("Constraint '{constraint}' not found in class '{class}'")]
    ConstraintNotFound { class: String, constraint: String },

    /// An index with the same columns already exists
    #[error("An index over the same columns as '{constraint}' already exists in class '{class}'")]
    IndexExists { class: String, constraint: String },

    /// Class already has a primary key
    #[error("Class '{class}' already has a primary key")]
    PrimaryKeyExists { class: String },

    /// Constraint property list could not be resolved
    #[error("Invalid constraint property for '{constraint}' in class '{class}'")]
    InvalidProperty { class: String, constraint: String },

    /// Foreign key references an unknown class
    #[error("Foreign key '{constraint}' references unknown class '{referenced}'")]
    ForeignKeyUnknownClass {
        constraint: String,
        referenced: String,
    },

    /// Referenced class has no primary key
    #[error("Referenced class '{referenced}' has no primary key")]
    ForeignKeyNoPrimaryKey { referenced: String },

    /// Foreign key column count differs from the referenced key
    #[error("Foreign key '{constraint}' has {got} columns, referenced key has {expected}")]
    ForeignKeyColumnCount {
        constraint: String,
        expected: usize,
        got: usize,
    },

    /// Foreign key column domain differs from the referenced key
    #[error("Foreign key '{constraint}' column '{column}' does not match the referenced key domain")]
    ForeignKeyTypeMismatch { constraint: String, column: String },

    /// Primary key referenced by another class
    #[error("Primary key '{constraint}' of '{class}' is referenced by foreign key '{referrer}'")]
    PrimaryKeyReferenced {
        class: String,
        constraint: String,
        referrer: String,
    },

    /// Existing rows violate a unique constraint
    #[error("Unique constraint '{constraint}' violated by existing rows")]
    UniqueViolation { constraint: String },

    /// Existing rows violate a foreign key
    #[error("Foreign key '{constraint}' violated by existing rows")]
    ForeignKeyViolation { constraint: String },

    /// Online index build not permitted in this context
    #[error("Online index build of '{constraint}' not allowed on '{class}': {reason}")]
    OnlineIndexNotAllowed {
        class: String,
        constraint: String,
        reason: &'static str,
    },

    /// Value cannot be represented in the domain
    #[error("Value {value} cannot be stored in domain {domain}")]
    InvalidValue { value: String, domain: String },

    /// Method could not be linked
    #[error("Method function '{function}' could not be resolved")]
    MethodNotLinked { function: String },

    /// Authorization denied by the transaction layer
    #[error("Authorization '{required}' denied on class '{class}'")]
    AuthorizationDenied { class: String, required: String },

    /// Deadlock reported by the lock manager
    #[error("Deadlock while locking class '{class}'")]
    Deadlock { class: String },

    /// Transaction unilaterally aborted
    #[error("Transaction unilaterally aborted: {0}")]
    UnilaterallyAborted(String),

    /// Savepoint not found
    #[error("Savepoint '{0}' not found")]
    SavepointNotFound(String),

    /// Storage engine failure
    #[error("Storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    /// Partition work failed mid-operation
    #[error("Partition work failed on '{class}': {reason}")]
    PartitionWorkFailed { class: String, reason: String },

    /// Partition request is invalid
    #[error("Invalid partition request on '{class}': {reason}")]
    InvalidPartitionRequest { class: String, reason: String },

    /// No partition accepts the value
    #[error("No partition of '{class}' accepts value {value}")]
    PartitionNotExist { class: String, value: String },

    /// Lock poisoned (RwLock poisoned)
    #[error("Lock poisoned")]
    LockPoisoned,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Transient I/O error that may succeed on retry
    #[error("Transient I/O error: {0}")]
    TransientIoError(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    /// Disk full
    #[error("Disk full: {0}")]
    DiskFull(String),
}

impl SchemaError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::AuthorizationDenied { .. } => ErrorKind::Authorization,
            SchemaError::Deadlock { .. } | SchemaError::UnilaterallyAborted(_) => ErrorKind::Lock,
            SchemaError::UniqueViolation { .. } | SchemaError::ForeignKeyViolation { .. } => {
                ErrorKind::ConstraintViolation
            }
            SchemaError::Storage { .. }
            | SchemaError::PartitionWorkFailed { .. }
            | SchemaError::LockPoisoned
            | SchemaError::SerializationError(_)
            | SchemaError::IoError(_)
            | SchemaError::TransientIoError(_)
            | SchemaError::DataCorruption(_)
            | SchemaError::DiskFull(_)
            | SchemaError::SavepointNotFound(_) => ErrorKind::Storage,
            _ => ErrorKind::Validation,
        }
    }

    /// Returns `true` if existing data violates a constraint being added.
    pub fn is_constraint_violation(&self) -> bool {
        self.kind() == ErrorKind::ConstraintViolation
    }

    /// Returns `true` if the transaction manager already unwound the transaction.
    ///
    /// No savepoint rollback may be attempted after such an error.
    pub fn is_unilateral_abort(&self) -> bool {
        self.kind() == ErrorKind::Lock
    }

    /// Returns `true` for I/O errors worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchemaError::TransientIoError(_))
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::SerializationError(err.to_string())
    }
}
