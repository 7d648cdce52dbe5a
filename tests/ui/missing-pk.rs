use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
struct User {
    email: String,
    name: String,
}

fn main() {}
