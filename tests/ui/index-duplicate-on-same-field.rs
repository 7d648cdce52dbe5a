use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
struct User {
    #[pk]
    email: String,
    #[dynamorm(index = "by_name", role = "pk")]
    #[dynamorm(index = "by_name", role = "pk")]
    name: String,
}

fn main() {}
