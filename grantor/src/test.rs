#![allow(dead_code)]

pub const PRIVATE_KEY_PEM: &str = include_str!("../data/private-key.pem");
pub const PRIVATE_KEY_PKCS1_PEM: &str = include_str!("../data/private-key-pkcs1.pem");
pub const PRIVATE_KEY_4096_PEM: &str = include_str!("../data/private-key-4096.pem");
pub const EC_PRIVATE_KEY_PEM: &str = include_str!("../data/ec-private-key.pem");
pub const SERVICE_ACCOUNT_JSON: &str = include_str!("../data/service-account.json");

pub const CLIENT_EMAIL: &str = "robot@grantor-test.iam.gserviceaccount.com";
pub const PRIVATE_KEY_ID: &str = "3f1d5a9c0b7e4e21a8d6c2f04b9e7a1d5c3b2a10";

pub fn service_account() -> crate::ServiceAccount {
    crate::ServiceAccount::from_json(SERVICE_ACCOUNT_JSON).expect("test service account is valid")
}
