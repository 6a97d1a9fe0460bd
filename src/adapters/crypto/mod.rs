pub mod fernet_cipher;

pub use fernet_cipher::FernetCipher;
