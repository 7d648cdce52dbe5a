use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
struct User {
    #[pk]
    email: String,
    #[sk]
    name: String,
    #[sk]
    tag: String,
}

fn main() {}
