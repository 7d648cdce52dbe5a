use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
struct User {
    #[pk]
    email: String,
    #[dynamorm(role = "pk")]
    name: String,
}

fn main() {}
