use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
struct Order {
    #[pk]
    order_id: String,
    #[dynamorm(index = "by_status", role = "sk")]
    status: String,
}

fn main() {}
