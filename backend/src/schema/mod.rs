diesel::table! {
    properties (id) {
        id -> Uuid,
        #[max_length = 120]
        name -> Varchar,
        #[max_length = 200]
        address -> Varchar,
        description -> Text,
        #[max_length = 200]
        image_ref -> Nullable<Varchar>,
        #[max_length = 64]
        owner_wallet -> Varchar,
        ledger_asset_id -> Nullable<Int8>,
        attributes -> Jsonb,
        listed_at -> Int8,
    }
}
