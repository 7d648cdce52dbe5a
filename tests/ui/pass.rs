use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
#[dynamorm(table = "users")]
struct User {
    #[pk]
    email: String,

    #[dynamorm(index = "by_name", role = "pk")]
    name: String,

    #[sk]
    joined_at: String,
}

fn main() {}
