//! Records and per-method argument/result structs of the Endpoint registry.
//!
//! IDL:
//!
//! ```text
//! struct Endpoint {
//!   1: required i32 ipv4
//!   2: required i16 port
//!   3: required string service_name
//! }
//!
//! exception NotFound {
//!   1: required string service_name
//! }
//!
//! service EndpointRegistry {
//!   bool register(1: Endpoint endpoint)
//!   Endpoint lookup(1: string service_name) throws (1: NotFound not_found)
//!   list<Endpoint> list()
//!   oneway void heartbeat(1: string service_name)
//! }
//! ```

use skiff_protocol::{
    DecodeError, FieldType, StructDescriptor, StructKind, StructValue, ThriftStruct, Value,
};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

macro_rules! descriptor {
    ($builder:expr) => {{
        static DESC: OnceLock<StructDescriptor> = OnceLock::new();
        DESC.get_or_init(|| $builder.build().expect("static schema"))
    }};
}

/// Address of one service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ipv4: i32,
    pub port: i16,
    pub service_name: String,
}

impl Endpoint {
    pub fn new(addr: Ipv4Addr, port: u16, service_name: impl Into<String>) -> Self {
        Self {
            ipv4: u32::from(addr) as i32,
            port: port as i16,
            service_name: service_name.into(),
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ipv4 as u32)
    }

    pub fn port(&self) -> u16 {
        self.port as u16
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.service_name, self.addr(), self.port())
    }
}

impl ThriftStruct for Endpoint {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("Endpoint")
            .required(1, "ipv4", FieldType::I32)
            .required(2, "port", FieldType::I16)
            .required(3, "service_name", FieldType::String))
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new()
            .with(1, self.ipv4)
            .with(2, self.port)
            .with(3, self.service_name.as_str())
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        let desc = Self::descriptor();
        Ok(Self {
            ipv4: value.take_required(desc, 1)?,
            port: value.take_required(desc, 2)?,
            service_name: value.take_required(desc, 3)?,
        })
    }
}

/// Declared exception of `lookup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    pub service_name: String,
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no endpoint registered for '{}'", self.service_name)
    }
}

impl std::error::Error for NotFound {}

impl ThriftStruct for NotFound {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("NotFound")
            .kind(StructKind::Exception)
            .required(1, "service_name", FieldType::String))
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new().with(1, self.service_name.as_str())
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        Ok(Self {
            service_name: value.take_required(Self::descriptor(), 1)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterArgs {
    pub endpoint: Endpoint,
}

impl ThriftStruct for RegisterArgs {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("register_args").required(
            1,
            "endpoint",
            FieldType::structure(Endpoint::descriptor().clone())
        ))
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new().with_struct(1, &self.endpoint)
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        Ok(Self {
            endpoint: value.take_required_struct(Self::descriptor(), 1)?,
        })
    }
}

/// `success` is true when an existing registration was replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterResult {
    pub success: Option<bool>,
}

impl ThriftStruct for RegisterResult {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("register_result").optional(
            0,
            "success",
            FieldType::Bool
        ))
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new().with_optional(0, self.success)
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        Ok(Self {
            success: value.take(Self::descriptor(), 0)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupArgs {
    pub service_name: String,
}

impl ThriftStruct for LookupArgs {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("lookup_args").required(
            1,
            "service_name",
            FieldType::String
        ))
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new().with(1, self.service_name.as_str())
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        Ok(Self {
            service_name: value.take_required(Self::descriptor(), 1)?,
        })
    }
}

/// Exactly one of `success` and `not_found` is set by a conforming server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupResult {
    pub success: Option<Endpoint>,
    pub not_found: Option<NotFound>,
}

impl ThriftStruct for LookupResult {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("lookup_result")
            .optional(0, "success", FieldType::structure(Endpoint::descriptor().clone()))
            .optional(1, "not_found", FieldType::structure(NotFound::descriptor().clone())))
    }

    fn to_struct_value(&self) -> StructValue {
        let mut value = StructValue::new();
        if let Some(endpoint) = &self.success {
            value = value.with_struct(0, endpoint);
        }
        if let Some(not_found) = &self.not_found {
            value = value.with_struct(1, not_found);
        }
        value
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        let desc = Self::descriptor();
        Ok(Self {
            success: value.take_struct(desc, 0)?,
            not_found: value.take_struct(desc, 1)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListArgs;

impl ThriftStruct for ListArgs {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("list_args"))
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new()
    }

    fn from_struct_value(_value: StructValue) -> Result<Self, DecodeError> {
        Ok(ListArgs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    pub success: Option<Vec<Endpoint>>,
}

impl ThriftStruct for ListResult {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("list_result").optional(
            0,
            "success",
            FieldType::list(FieldType::structure(Endpoint::descriptor().clone()))
        ))
    }

    fn to_struct_value(&self) -> StructValue {
        let mut value = StructValue::new();
        if let Some(endpoints) = &self.success {
            value.insert(0, Value::struct_list(endpoints));
        }
        value
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        Ok(Self {
            success: value.take_struct_list(Self::descriptor(), 0)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatArgs {
    pub service_name: String,
}

impl ThriftStruct for HeartbeatArgs {
    fn descriptor() -> &'static StructDescriptor {
        descriptor!(StructDescriptor::builder("heartbeat_args").required(
            1,
            "service_name",
            FieldType::String
        ))
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new().with(1, self.service_name.as_str())
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        Ok(Self {
            service_name: value.take_required(Self::descriptor(), 1)?,
        })
    }
}
