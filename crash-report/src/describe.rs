//! The interface to runtimes that can describe objects living at arbitrary
//! addresses, eg. an Objective-C or managed language runtime.

/// A scalar or reference stored in an object
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FieldValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
    /// The address of another object, which is described in turn
    Reference(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectField {
    pub name: String,
    pub value: FieldValue,
}

/// What could be extracted from an object
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectContents {
    None,
    /// A single value, eg. a boxed number or date
    Value(FieldValue),
    /// String contents, eg. of a string or URL object
    Text(String),
    /// The address of the first element of a collection
    FirstObject(usize),
    /// The fields of an object of an otherwise unknown class
    Ivars(Vec<ObjectField>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Class,
    Object,
    Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectDescription {
    pub kind: ObjectKind,
    pub class_name: Option<String>,
    pub contents: ObjectContents,
}

/// Describes objects of a runtime the crash reporter knows nothing about.
///
/// Implementations must only read memory through means that can't fault, as
/// any address found on the stack or in a register is passed to them.
pub trait ObjectDescriber: Send + Sync {
    /// Describes the object at `address`, or returns `None` if it is not a
    /// recognized object
    fn describe(&self, address: usize) -> Option<ObjectDescription>;

    /// The class of the deallocated object that used to live at `address`
    fn zombie_class_name(&self, _address: usize) -> Option<String> {
        None
    }
}
