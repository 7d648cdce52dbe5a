use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
struct User {
    #[pk]
    email: String,
    #[dynamorm(set, json)]
    tags: Vec<String>,
}

fn main() {}
