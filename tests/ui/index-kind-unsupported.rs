use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
struct User {
    #[pk]
    email: String,
    #[dynamorm(index = "by_name", role = "pk", kind = "bogus")]
    name: String,
}

fn main() {}
