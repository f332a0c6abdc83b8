//! Esquema Diesel (mantenido a mano). Reemplazable con `diesel print-schema`.

diesel::table! {
    orders (id) {
        id -> Uuid,
        title -> Text,
        applicant -> Text,
        progress -> Text,
        sql_kind -> Text,
        environment -> Text,
        schedule_time -> Nullable<Timestamptz>,
        payload -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_tasks (id) {
        id -> Uuid,
        order_id -> Uuid,
        seq -> Int4,
        progress -> Text,
        payload -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_oplogs (id) {
        id -> Int8,
        order_id -> Uuid,
        username -> Text,
        msg -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    permission_templates (id) {
        id -> Int8,
        name -> Text,
        permissions -> Jsonb,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    role_permissions (id) {
        id -> Int8,
        role -> Text,
        grant_spec -> Jsonb,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    user_permissions (id) {
        id -> Int8,
        username -> Text,
        instance_id -> Text,
        schema_name -> Text,
        table_name -> Text,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    db_instances (id) {
        id -> Uuid,
        host -> Text,
        port -> Int4,
        username -> Text,
        password -> Text,
        db_kind -> Text,
    }
}

diesel::joinable!(order_tasks -> orders (order_id));
diesel::joinable!(order_oplogs -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    order_tasks,
    order_oplogs,
    permission_templates,
    role_permissions,
    user_permissions,
    db_instances,
);
