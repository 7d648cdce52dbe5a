use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
struct User {
    #[pk]
    email: String,
    #[dynamorm(index = "by_name")]
    name: String,
}

fn main() {}
