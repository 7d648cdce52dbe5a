#![allow(unused_imports)]

use dynamorm::{
    AttributeValue, Client, DynamormConfig, DynamormConfigBuilder, DynamormTable, Error,
    ErrorKind, Fetch, Model, Page, PrimaryKey, QueryBuilder, SchemaRegistry, TransactBuilder,
    UpdateBuilder,
};

use dynamorm::crypto::{DataKey, KmsKeyProvider};
use dynamorm::expr::Operator;
use dynamorm::transport::{AwsTransport, Transport, TransportError};

fn main() {}
