// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Declarative service contracts and their validation.
//!
//! A [`ServiceDescription`] is the static model a proxy and a dispatcher
//! are derived from. It is built once, validated by [`build`], and
//! immutable afterwards. Validation rejects every interface shape that
//! cannot be marshalled safely, before anything is registered on the bus.
//!
//! [`build`]: ServiceDescriptionBuilder::build

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Marshallable type of a parameter or result element.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeShape {
    Bool,
    Integer,
    Float,
    Str,
    /// A structured value (string-keyed object).
    Structured,
    List(Box<TypeShape>),
    Set(Box<TypeShape>),
    /// String-keyed mapping to the element shape.
    Map(Box<TypeShape>),
    /// A reference to another service contract.
    Service(Arc<ServiceDescription>),
    /// A named type the proxy layer cannot marshal. Always rejected;
    /// exists so that rejections can name the offending type.
    Opaque(String),
}

impl TypeShape {
    fn is_basic(&self) -> bool {
        matches!(
            self,
            TypeShape::Bool | TypeShape::Integer | TypeShape::Float | TypeShape::Str
        )
    }

    fn is_element(&self) -> bool {
        self.is_basic() || matches!(self, TypeShape::Structured)
    }
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeShape::Bool => write!(f, "bool"),
            TypeShape::Integer => write!(f, "integer"),
            TypeShape::Float => write!(f, "float"),
            TypeShape::Str => write!(f, "string"),
            TypeShape::Structured => write!(f, "structured value"),
            TypeShape::List(inner) => write!(f, "list<{inner}>"),
            TypeShape::Set(inner) => write!(f, "set<{inner}>"),
            TypeShape::Map(inner) => write!(f, "map<string, {inner}>"),
            TypeShape::Service(desc) => write!(f, "service {}", desc.name()),
            TypeShape::Opaque(name) => write!(f, "{name}"),
        }
    }
}

/// How a method's result travels back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnShape {
    Unit,
    Single(TypeShape),
    List(TypeShape),
    Set(TypeShape),
    Map(TypeShape),
    /// The result is a reference to a connection-scoped service; the reply
    /// carries the address of a freshly registered dispatcher for it.
    Service(Arc<ServiceDescription>),
}

/// Request/reply vs fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    RequestReply,
    FireAndForget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescription {
    name: String,
    shape: TypeShape,
}

impl ParamDescription {
    pub fn new(name: impl Into<String>, shape: TypeShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &TypeShape {
        &self.shape
    }
}

/// One method of a service contract. The action identifier routing
/// messages to it is the method name, unique within the service.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescription {
    name: String,
    params: Vec<ParamDescription>,
    returns: ReturnShape,
    kind: CallKind,
    close: bool,
    fluent: bool,
}

impl MethodDescription {
    /// A request/reply method.
    pub fn request(
        name: impl Into<String>,
        params: Vec<ParamDescription>,
        returns: ReturnShape,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            kind: CallKind::RequestReply,
            close: false,
            fluent: false,
        }
    }

    /// A fire-and-forget method: no reply is ever produced.
    pub fn fire_and_forget(name: impl Into<String>, params: Vec<ParamDescription>) -> Self {
        Self {
            name: name.into(),
            params,
            returns: ReturnShape::Unit,
            kind: CallKind::FireAndForget,
            close: false,
            fluent: false,
        }
    }

    /// Mark this method as the designated close operation.
    pub fn close(mut self) -> Self {
        self.close = true;
        self
    }

    /// Mark this method as fluent (chainable on the client side).
    pub fn fluent(mut self) -> Self {
        self.fluent = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The action identifier, derived from the method name.
    pub fn action(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamDescription] {
        &self.params
    }

    pub fn returns(&self) -> &ReturnShape {
        &self.returns
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn is_close(&self) -> bool {
        self.close
    }

    pub fn is_fluent(&self) -> bool {
        self.fluent
    }
}

/// Immutable model of a service interface.
#[derive(Debug, PartialEq)]
pub struct ServiceDescription {
    name: String,
    methods: Vec<MethodDescription>,
    index: HashMap<String, usize>,
}

impl ServiceDescription {
    pub fn builder(name: impl Into<String>) -> ServiceDescriptionBuilder {
        ServiceDescriptionBuilder {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescription] {
        &self.methods
    }

    /// Look up a method by its action identifier.
    pub fn method(&self, action: &str) -> Option<&MethodDescription> {
        self.index.get(action).map(|i| &self.methods[*i])
    }

    /// The designated close operation, if the contract declares one.
    pub fn close_method(&self) -> Option<&MethodDescription> {
        self.methods.iter().find(|m| m.is_close())
    }
}

/// An interface shape that cannot be exposed as a remote service.
/// Raised at build time, never at runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractViolation {
    #[error("method `{method}`: close operations take no parameters")]
    CloseWithParams { method: String },

    #[error("method `{method}`: close operations cannot return a value")]
    CloseWithResult { method: String },

    #[error("method `{method}`: parameter `{param}` of type {shape} cannot reference a service; service references are only legal as results")]
    ServiceParam {
        method: String,
        param: String,
        shape: String,
    },

    #[error("method `{method}`: type {shape} of parameter `{param}` is not legal for a proxied call")]
    IllegalParam {
        method: String,
        param: String,
        shape: String,
    },

    #[error("method `{method}`: result type {shape} is not legal for a proxied result")]
    IllegalResult { method: String, shape: String },

    #[error("method `{method}`: fire-and-forget methods cannot produce a result")]
    FireAndForgetWithResult { method: String },

    #[error("service `{service}`: duplicate action `{action}`")]
    DuplicateAction { service: String, action: String },
}

pub struct ServiceDescriptionBuilder {
    name: String,
    methods: Vec<MethodDescription>,
}

impl ServiceDescriptionBuilder {
    pub fn method(mut self, method: MethodDescription) -> Self {
        self.methods.push(method);
        self
    }

    /// Validate the contract and freeze it.
    pub fn build(self) -> Result<Arc<ServiceDescription>, ContractViolation> {
        let mut index = HashMap::new();
        for (i, method) in self.methods.iter().enumerate() {
            if index.insert(method.name.clone(), i).is_some() {
                return Err(ContractViolation::DuplicateAction {
                    service: self.name.clone(),
                    action: method.name.clone(),
                });
            }
            validate_method(method)?;
        }

        Ok(Arc::new(ServiceDescription {
            name: self.name,
            methods: self.methods,
            index,
        }))
    }
}

fn validate_method(method: &MethodDescription) -> Result<(), ContractViolation> {
    if method.close {
        if !method.params.is_empty() {
            return Err(ContractViolation::CloseWithParams {
                method: method.name.clone(),
            });
        }
        if method.returns != ReturnShape::Unit {
            return Err(ContractViolation::CloseWithResult {
                method: method.name.clone(),
            });
        }
    }

    if method.kind == CallKind::FireAndForget && method.returns != ReturnShape::Unit {
        return Err(ContractViolation::FireAndForgetWithResult {
            method: method.name.clone(),
        });
    }

    for param in &method.params {
        validate_param(method, param)?;
    }

    validate_return(method)
}

fn validate_param(
    method: &MethodDescription,
    param: &ParamDescription,
) -> Result<(), ContractViolation> {
    let illegal = |shape: &TypeShape| ContractViolation::IllegalParam {
        method: method.name.clone(),
        param: param.name.clone(),
        shape: shape.to_string(),
    };

    match &param.shape {
        TypeShape::Service(_) => Err(ContractViolation::ServiceParam {
            method: method.name.clone(),
            param: param.name.clone(),
            shape: param.shape.to_string(),
        }),
        TypeShape::Opaque(_) => Err(illegal(&param.shape)),
        TypeShape::List(inner) | TypeShape::Set(inner) | TypeShape::Map(inner) => {
            if inner.is_element() {
                Ok(())
            } else {
                Err(illegal(&param.shape))
            }
        }
        _ => Ok(()),
    }
}

fn validate_return(method: &MethodDescription) -> Result<(), ContractViolation> {
    let illegal = |shape: String| ContractViolation::IllegalResult {
        method: method.name.clone(),
        shape,
    };

    match &method.returns {
        ReturnShape::Unit | ReturnShape::Service(_) => Ok(()),
        ReturnShape::Single(shape) => {
            if shape.is_element() {
                Ok(())
            } else {
                Err(illegal(shape.to_string()))
            }
        }
        ReturnShape::List(element) | ReturnShape::Set(element) | ReturnShape::Map(element) => {
            if element.is_element() {
                Ok(())
            } else {
                Err(illegal(method.returns_display()))
            }
        }
    }
}

impl MethodDescription {
    fn returns_display(&self) -> String {
        match &self.returns {
            ReturnShape::Unit => "unit".to_string(),
            ReturnShape::Single(shape) => shape.to_string(),
            ReturnShape::List(element) => format!("list<{element}>"),
            ReturnShape::Set(element) => format!("set<{element}>"),
            ReturnShape::Map(element) => format!("map<string, {element}>"),
            ReturnShape::Service(desc) => format!("service {}", desc.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Arc<ServiceDescription> {
        ServiceDescription::builder("Minimal")
            .method(MethodDescription::request(
                "ping",
                vec![],
                ReturnShape::Unit,
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_method_lookup_by_action() {
        let desc = minimal();
        assert!(desc.method("ping").is_some());
        assert!(desc.method("pong").is_none());
    }

    #[test]
    fn test_close_with_params_rejected() {
        let err = ServiceDescription::builder("S")
            .method(
                MethodDescription::request(
                    "shutdown",
                    vec![ParamDescription::new("force", TypeShape::Bool)],
                    ReturnShape::Unit,
                )
                .close(),
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::CloseWithParams {
                method: "shutdown".into()
            }
        );
    }

    #[test]
    fn test_close_with_result_rejected() {
        let err = ServiceDescription::builder("S")
            .method(
                MethodDescription::request(
                    "shutdown",
                    vec![],
                    ReturnShape::Single(TypeShape::Str),
                )
                .close(),
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::CloseWithResult {
                method: "shutdown".into()
            }
        );
    }

    #[test]
    fn test_service_param_rejected() {
        let nested = minimal();
        let err = ServiceDescription::builder("S")
            .method(MethodDescription::request(
                "attach",
                vec![ParamDescription::new(
                    "peer",
                    TypeShape::Service(nested),
                )],
                ReturnShape::Unit,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractViolation::ServiceParam { .. }));
    }

    #[test]
    fn test_opaque_param_rejected() {
        let err = ServiceDescription::builder("S")
            .method(MethodDescription::request(
                "store",
                vec![ParamDescription::new(
                    "blob",
                    TypeShape::Opaque("RawSocket".into()),
                )],
                ReturnShape::Unit,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractViolation::IllegalParam { .. }));
    }

    #[test]
    fn test_nested_container_param_rejected() {
        let err = ServiceDescription::builder("S")
            .method(MethodDescription::request(
                "matrix",
                vec![ParamDescription::new(
                    "rows",
                    TypeShape::List(Box::new(TypeShape::List(Box::new(TypeShape::Integer)))),
                )],
                ReturnShape::Unit,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractViolation::IllegalParam { .. }));
    }

    #[test]
    fn test_opaque_result_rejected() {
        let err = ServiceDescription::builder("S")
            .method(MethodDescription::request(
                "handle",
                vec![],
                ReturnShape::Single(TypeShape::Opaque("FileHandle".into())),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractViolation::IllegalResult { .. }));
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let err = ServiceDescription::builder("S")
            .method(MethodDescription::request("go", vec![], ReturnShape::Unit))
            .method(MethodDescription::request(
                "go",
                vec![],
                ReturnShape::Single(TypeShape::Integer),
            ))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::DuplicateAction {
                service: "S".into(),
                action: "go".into()
            }
        );
    }

    #[test]
    fn test_fluent_method_accepted() {
        let desc = ServiceDescription::builder("S")
            .method(
                MethodDescription::request(
                    "configure",
                    vec![ParamDescription::new("key", TypeShape::Str)],
                    ReturnShape::Unit,
                )
                .fluent(),
            )
            .build()
            .unwrap();
        assert!(desc.method("configure").unwrap().is_fluent());
    }

    #[test]
    fn test_service_result_accepted() {
        let nested = minimal();
        let desc = ServiceDescription::builder("S")
            .method(MethodDescription::request(
                "open",
                vec![],
                ReturnShape::Service(nested.clone()),
            ))
            .build()
            .unwrap();
        match desc.method("open").unwrap().returns() {
            ReturnShape::Service(d) => assert_eq!(d.name(), "Minimal"),
            other => panic!("unexpected shape: {other:?}"),
        }
    }
}
