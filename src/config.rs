use std::env;

const DEFAULT_DATABASE_URL: &str = "sqlite://./data/barbershop.db";
const DEFAULT_SEED_PASSWORD: &str = "demo123";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub host: String,
    pub port: u16,
    pub seed_barber: SeedBarber,
}

/// Staff account created when the barbers table is empty.
#[derive(Clone, Debug)]
pub struct SeedBarber {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Self {
        let seed_barber = SeedBarber {
            name: env_or("SEED_BARBER_NAME", "Demo Barber"),
            email: env_or("SEED_BARBER_EMAIL", "demo@kingsbarber.com"),
            password: env_or("SEED_BARBER_PASSWORD", DEFAULT_SEED_PASSWORD),
        };

        Self {
            database_url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|value| value.parse().ok())
                .filter(|value: &u32| *value > 0)
                .unwrap_or(5),
            host: env_or("HOST", "0.0.0.0"),
            port: env::var("PORT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(8080),
            seed_barber,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SeedBarber {
    pub fn uses_default_password(&self) -> bool {
        self.password == DEFAULT_SEED_PASSWORD
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
