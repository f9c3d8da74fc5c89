diesel::table! {
    properties (id) {
        id -> Text,
        record -> Text,
        sync_status -> Nullable<Text>,
    }
}

diesel::table! {
    inspections (id) {
        id -> Text,
        record -> Text,
        sync_status -> Nullable<Text>,
        property_id -> Nullable<Text>,
    }
}

diesel::table! {
    evidence (id) {
        id -> Text,
        record -> Text,
        sync_status -> Nullable<Text>,
        inspection_id -> Nullable<Text>,
    }
}

diesel::table! {
    sync_queue (id) {
        id -> Text,
        record -> Text,
        status -> Nullable<Text>,
    }
}

diesel::table! {
    app_state (id) {
        id -> Text,
        record -> Text,
    }
}
