//! Minimal CLI over the crypto backend. Commands are intentionally small and
//! auditable: each one drives the public factory surface the way a host
//! process would, then tears the backend down in an orderly fashion.

use std::env;

use base64::{engine::general_purpose::STANDARD, Engine};
use trustcore::backend::hash_key_db_password;
use trustcore::{
    ensure_initialized, shutdown, BackendContext, CryptoFactory, CIPHER_AES_CBC_W3C, DIGEST_SHA1,
    DIGEST_SHA1_1K, DIGEST_SHA256, DIGEST_SHA256_1K, DIGEST_SHA512, DIGEST_SHA512_1K,
};

fn print_usage() {
    eprintln!(
        "Commands:\n  status\n  digest <sha1|sha256|sha512|sha1-1k|sha256-1k|sha512-1k> <data>\n  encrypt <base64-key> <base64-iv> <plaintext>\n  decrypt <base64-key> <base64-iv> <base64-ciphertext>\n  hash-store-password <plaintext>"
    );
}

fn digest_id(name: &str) -> Option<u32> {
    match name {
        "sha1" => Some(DIGEST_SHA1),
        "sha256" => Some(DIGEST_SHA256),
        "sha512" => Some(DIGEST_SHA512),
        "sha1-1k" => Some(DIGEST_SHA1_1K),
        "sha256-1k" => Some(DIGEST_SHA256_1K),
        "sha512-1k" => Some(DIGEST_SHA512_1K),
        _ => None,
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_b64(label: &str, value: &str) -> Option<Vec<u8>> {
    match STANDARD.decode(value.as_bytes()) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            eprintln!("invalid base64 {label}: {err}");
            None
        }
    }
}

fn run_status() {
    let ctx = BackendContext::default();
    if !ensure_initialized(&ctx) {
        eprintln!("backend unavailable");
        return;
    }
    match trustcore::lifecycle::global_backend() {
        Some(backend) => {
            match backend.profile_dir() {
                Some(dir) => println!("profile: {}", dir.display()),
                None => println!("profile: none (ephemeral store)"),
            }
            match backend.find_module(trustcore::module::ROOT_MODULE_NAME) {
                Some(module) if module.loaded => println!("root module: loaded"),
                Some(_) => println!("root module: registered but not loaded"),
                None => println!("root module: absent"),
            }
            println!("open sessions: {}", backend.open_sessions());
        }
        None => eprintln!("backend state unavailable"),
    }
}

fn run_digest(alg: &str, data: &str) {
    let Some(id) = digest_id(alg) else {
        eprintln!("unknown digest algorithm: {alg}");
        return;
    };
    let factory = CryptoFactory::new(BackendContext::default());
    match factory.create_digest_context(id, &[]) {
        Ok(Some(mut ctx)) => {
            ctx.update(data.as_bytes());
            println!("{}", to_hex(&ctx.finish()));
        }
        Ok(None) => eprintln!("backend unavailable"),
        Err(err) => eprintln!("digest setup failed: {err}"),
    }
}

fn run_cipher(encrypting: bool, key_b64: &str, iv_b64: &str, payload: &str) {
    let Some(key) = decode_b64("key", key_b64) else {
        return;
    };
    let Some(iv) = decode_b64("iv", iv_b64) else {
        return;
    };
    let input = if encrypting {
        payload.as_bytes().to_vec()
    } else {
        match decode_b64("ciphertext", payload) {
            Some(bytes) => bytes,
            None => return,
        }
    };

    let factory = CryptoFactory::new(BackendContext::default());
    let mut context =
        match factory.create_cipher_context(CIPHER_AES_CBC_W3C, &key, &iv, encrypting, &[]) {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return eprintln!("backend unavailable"),
            Err(err) => return eprintln!("cipher setup failed: {err}"),
        };

    let mut output = match context.update(&input) {
        Ok(bytes) => bytes,
        Err(err) => return eprintln!("cipher failed: {err}"),
    };
    match context.finish() {
        Ok(bytes) => output.extend(bytes),
        Err(err) => return eprintln!("cipher failed: {err}"),
    }

    if encrypting {
        println!("{}", STANDARD.encode(&output));
    } else {
        match String::from_utf8(output) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("decryption succeeded but UTF-8 failed: {err}"),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "status" => {
            if args.len() != 2 {
                return print_usage();
            }
            run_status();
        }
        "digest" => {
            if args.len() != 4 {
                return print_usage();
            }
            run_digest(&args[2], &args[3]);
        }
        "encrypt" => {
            if args.len() != 5 {
                return print_usage();
            }
            run_cipher(true, &args[2], &args[3], &args[4]);
        }
        "decrypt" => {
            if args.len() != 5 {
                return print_usage();
            }
            run_cipher(false, &args[2], &args[3], &args[4]);
        }
        "hash-store-password" => {
            if args.len() != 3 {
                return print_usage();
            }
            match hash_key_db_password(&args[2]) {
                Ok(hash) => println!("{hash}"),
                Err(err) => eprintln!("hashing failed: {err}"),
            }
        }
        _ => print_usage(),
    }

    shutdown();
}
