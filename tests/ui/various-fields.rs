use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
#[dynamorm(table = "widgets")]
struct Widget {
    #[pk]
    id: String,

    ct_a: i64,
    ct_b: i32,
    ct_c: i16,
    ct_d: f64,
    ct_e: bool,
    ct_h: u64,

    ct_a_some: Option<i64>,
    ct_i_some: Option<String>,

    #[encrypted]
    secret: String,

    #[dynamorm(set)]
    tags: Vec<String>,

    #[dynamorm(json)]
    metadata: serde_json::Value,

    #[dynamorm(attr = "blob", omit_empty)]
    payload: Vec<u8>,

    #[ttl]
    #[dynamorm(sparse)]
    expires_at: Option<i64>,

    #[version]
    version: i64,

    #[created_at]
    created_at: String,

    #[updated_at]
    updated_at: String,
}

fn main() {}
