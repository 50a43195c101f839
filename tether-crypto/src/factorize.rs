//! Pollard-rho (Brent variant) integer factorization, used for the `pq`
//! challenge of the handshake.

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 { let t = b; b = a % b; a = t; }
    a
}

fn modpow(mut n: u128, mut e: u128, m: u128) -> u128 {
    if m == 1 { return 0; }
    let mut result = 1;
    n %= m;
    while e > 0 {
        if e & 1 == 1 { result = result * n % m; }
        e >>= 1;
        n = n * n % m;
    }
    result
}

fn abs_sub(a: u128, b: u128) -> u128 { a.max(b) - a.min(b) }

/// Deterministic Miller-Rabin; these bases are exact for every `u64`.
fn is_prime(n: u64) -> bool {
    const BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 { return false; }
    for p in BASES {
        if n % p == 0 { return n == p; }
    }

    let n = n as u128;
    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 { d /= 2; s += 1; }

    'witness: for a in BASES {
        let mut x = modpow(a as u128, d, n);
        if x == 1 || x == n - 1 { continue; }
        for _ in 1..s {
            x = x * x % n;
            if x == n - 1 { continue 'witness; }
        }
        return false;
    }
    true
}

/// One Brent cycle-finding run with polynomial `y² + c`. Returns a divisor
/// of `pq`, which may be trivial.
fn find_divisor(pq: u128, c: u128) -> u128 {
    let f = |v: u128| (modpow(v, 2, pq) + c) % pq;

    let mut y = 3 * (pq / 7);
    let m = 7 * (pq / 13);
    let mut g = 1u128;
    let mut r = 1u128;
    let mut q = 1u128;
    let mut x = 0u128;
    let mut ys = 0u128;

    while g == 1 {
        x = y;
        for _ in 0..r { y = f(y); }
        let mut k = 0;
        while k < r && g == 1 {
            ys = y;
            for _ in 0..m.min(r - k) {
                y = f(y);
                q = q * abs_sub(x, y) % pq;
            }
            g = gcd(q, pq);
            k += m;
        }
        r *= 2;
    }

    if g == pq {
        loop {
            ys = f(ys);
            g = gcd(abs_sub(x, ys), pq);
            if g > 1 { break; }
        }
    }
    g
}

fn random_below(n: u128) -> u128 {
    let mut b = [0u8; 8];
    getrandom::getrandom(&mut b).expect("OS random source unavailable");
    1 + u64::from_le_bytes(b) as u128 % (n - 1)
}

/// Split `pq` into two factors `(p, q)` with `p <= q` and `p * q == pq`.
///
/// Returns `None` when `pq` has no non-trivial factorization (it is below 4
/// or prime) or every attempt failed.
pub fn factorize(pq: u64) -> Option<(u64, u64)> {
    if pq < 4 || is_prime(pq) { return None; }
    if pq % 2 == 0 { return Some((2, pq / 2)); }

    // Small factors make the polynomial degenerate; trial division is exact.
    let mut d = 3u64;
    while d < 1 << 16 && d * d <= pq {
        if pq % d == 0 { return Some((d, pq / d)); }
        d += 2;
    }

    let n = pq as u128;
    let fixed = [43u128, 47, 53, 59, 61].map(|k| k * (n / 103) % n);
    let random = (0..16).map(|_| random_below(n));

    fixed.into_iter().chain(random).find_map(|c| {
        let g = find_divisor(n, c);
        (g != 1 && g != n).then(|| {
            let (p, q) = (g as u64, (n / g) as u64);
            (p.min(q), p.max(q))
        })
    })
}
